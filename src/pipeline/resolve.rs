//! Classifier output → normalized `FoodResult`.

use tracing::debug;

use crate::models::{ClassificationOutcome, FoodResult};

use super::lookup::FoodLookupTable;
use super::recommend::recommend;

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultResolver {
    table: FoodLookupTable,
    local_recommendations: bool,
}

impl ResultResolver {
    pub fn new(table: FoodLookupTable) -> Self {
        Self {
            table,
            local_recommendations: false,
        }
    }

    /// Attach threshold-based advice to on-device hits.
    pub fn with_local_recommendations(mut self, enabled: bool) -> Self {
        self.local_recommendations = enabled;
        self
    }

    pub fn table(&self) -> &FoodLookupTable {
        &self.table
    }

    /// `None` for a remote failure: the caller presents the error instead.
    /// A lookup miss is not a failure and yields the unrecognized sentinel.
    pub fn resolve(&self, outcome: &ClassificationOutcome) -> Option<FoodResult> {
        match outcome {
            ClassificationOutcome::RemoteSuccess {
                food_name,
                confidence,
                nutrition,
                recommendation,
                top_predictions,
            } => Some(FoodResult {
                name: food_name.clone(),
                confidence: *confidence,
                nutrition: *nutrition,
                recommendation: recommendation.clone(),
                is_unknown: false,
                top_predictions: top_predictions.clone(),
            }),
            ClassificationOutcome::RemoteFailure { .. } => None,
            ClassificationOutcome::OnDeviceResult {
                class_index,
                confidence,
            } => Some(match self.table.get(*class_index) {
                Some(info) => FoodResult {
                    name: info.name.to_string(),
                    confidence: *confidence,
                    nutrition: info.nutrition,
                    recommendation: self
                        .local_recommendations
                        .then(|| recommend(&info.nutrition)),
                    is_unknown: false,
                    top_predictions: Vec::new(),
                },
                None => {
                    debug!(class_index, "Class not in lookup table");
                    FoodResult::unrecognized(*confidence)
                }
            }),
        }
    }
}
