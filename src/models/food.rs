use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::nutrition::NutritionRecord;

/// Name given to a prediction the lookup table cannot map.
pub const UNRECOGNIZED_NAME: &str = "Unrecognized";

/// One alternative candidate reported by the classification backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPrediction {
    pub food: String,
    pub confidence: f32,
}

/// Normalized recognition result, independent of where inference ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodResult {
    pub name: String,
    pub confidence: f32,
    pub nutrition: NutritionRecord,
    pub recommendation: Option<String>,
    pub is_unknown: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_predictions: Vec<TopPrediction>,
}

impl FoodResult {
    /// Sentinel for a class the lookup table does not cover.
    pub fn unrecognized(confidence: f32) -> Self {
        Self {
            name: UNRECOGNIZED_NAME.to_string(),
            confidence,
            nutrition: NutritionRecord::unknown(),
            recommendation: None,
            is_unknown: true,
            top_predictions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryEntryId(pub Uuid);

impl HistoryEntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HistoryEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HistoryEntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A saved result. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: HistoryEntryId,
    pub owner_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub result: FoodResult,
}
