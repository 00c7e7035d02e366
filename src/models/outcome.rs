use serde::{Deserialize, Serialize};

use super::enums::FailureKind;
use super::food::TopPrediction;
use super::nutrition::NutritionRecord;

/// Raw output of a classifier strategy, before resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClassificationOutcome {
    RemoteSuccess {
        food_name: String,
        confidence: f32,
        nutrition: NutritionRecord,
        recommendation: Option<String>,
        #[serde(default)]
        top_predictions: Vec<TopPrediction>,
    },
    RemoteFailure {
        kind: FailureKind,
        error_message: String,
    },
    OnDeviceResult {
        class_index: usize,
        confidence: f32,
    },
}

impl ClassificationOutcome {
    pub fn remote_failure(kind: FailureKind, error_message: impl Into<String>) -> Self {
        Self::RemoteFailure {
            kind,
            error_message: error_message.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::RemoteFailure { .. })
    }
}
