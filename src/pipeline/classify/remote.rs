//! Remote classification over HTTP.
//!
//! One multipart POST per image, raced against a timer. The request runs
//! as its own task; when the timer wins the task is aborted and the caller
//! gets a `Timeout` failure. No retries.

use std::time::Duration;

use reqwest::multipart;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};

use crate::models::{ClassificationOutcome, FailureKind, NutritionRecord, TopPrediction};
use crate::pipeline::preprocess::PreparedImage;
use crate::pipeline::ClassifierError;

/// Multipart field the backend reads the photo from.
pub const UPLOAD_FIELD: &str = "image";
pub const UPLOAD_FILENAME: &str = "food_upload.jpg";
pub const UPLOAD_MIME: &str = "image/jpeg";

pub const TIMEOUT_MESSAGE: &str = "Timeout";
const NO_CONNECTIVITY_MESSAGE: &str = "No internet connection. Check your network and try again.";
const REJECTION_DEFAULT_MESSAGE: &str = "Classification failed";
const INVALID_RESPONSE_MESSAGE: &str = "Invalid response from server";

/// Response body of `POST /predict`.
#[derive(Debug, Deserialize)]
struct PredictResponse {
    success: bool,
    food: Option<String>,
    confidence: Option<f32>,
    nutrition: Option<NutritionRecord>,
    recommendation: Option<String>,
    #[serde(default)]
    top_predictions: Vec<TopPrediction>,
    error: Option<String>,
}

/// Response body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub success: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub model_loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response body of `GET /foods`.
#[derive(Debug, Deserialize)]
struct FoodsResponse {
    success: bool,
    #[serde(default)]
    foods: Vec<String>,
    error: Option<String>,
}

/// HTTP client for the classification backend.
#[derive(Debug, Clone)]
pub struct RemoteClassifier {
    client: reqwest::Client,
    endpoint: String,
    base_url: String,
    timeout: Duration,
}

impl RemoteClassifier {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ClassifierError> {
        // No client-level timeout: `classify` runs its own race so the
        // in-flight task can be aborted.
        let client = reqwest::Client::builder().build()?;
        let endpoint = endpoint.trim().to_string();
        Ok(Self {
            client,
            base_url: base_url(&endpoint),
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Upload the prepared JPEG and map the reply onto a remote outcome.
    ///
    /// Always returns `RemoteSuccess` or `RemoteFailure`.
    pub async fn classify(&self, prepared: PreparedImage) -> ClassificationOutcome {
        let span = info_span!(
            "remote_classify",
            endpoint = %self.endpoint,
            bytes = prepared.jpeg_bytes.len(),
            width = prepared.width,
            height = prepared.height,
        );

        async move {
            let mut request = tokio::spawn(post_image(
                self.client.clone(),
                self.endpoint.clone(),
                prepared.jpeg_bytes,
            ));

            let outcome = tokio::select! {
                joined = &mut request => match joined {
                    Ok(outcome) => outcome,
                    Err(e) => ClassificationOutcome::remote_failure(
                        FailureKind::Network,
                        format!("Request task failed: {e}"),
                    ),
                },
                _ = tokio::time::sleep(self.timeout) => {
                    request.abort();
                    warn!(timeout_ms = self.timeout.as_millis() as u64, "Remote classification timed out");
                    ClassificationOutcome::remote_failure(FailureKind::Timeout, TIMEOUT_MESSAGE)
                }
            };

            match &outcome {
                ClassificationOutcome::RemoteSuccess {
                    food_name,
                    confidence,
                    ..
                } => info!(food = %food_name, confidence, "Remote classification succeeded"),
                ClassificationOutcome::RemoteFailure {
                    kind,
                    error_message,
                } => warn!(kind = %kind, error = %error_message, "Remote classification failed"),
                ClassificationOutcome::OnDeviceResult { .. } => {}
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// `GET <base>/health`.
    pub async fn health(&self) -> Result<BackendHealth, ClassifierError> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).timeout(self.timeout).send().await?;
        let status = response.status();
        let body = response.text().await?;

        serde_json::from_str(&body).map_err(|_| {
            ClassifierError::Backend(format!("Unexpected health response (status {status})"))
        })
    }

    /// `GET <base>/foods`: names the backend can recognize.
    pub async fn available_foods(&self) -> Result<Vec<String>, ClassifierError> {
        let url = format!("{}/foods", self.base_url);
        let response = self.client.get(&url).timeout(self.timeout).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let parsed: FoodsResponse = serde_json::from_str(&body).map_err(|_| {
            ClassifierError::Backend(format!("Unexpected foods response (status {status})"))
        })?;
        if !parsed.success {
            return Err(ClassifierError::Backend(
                parsed.error.unwrap_or_else(|| REJECTION_DEFAULT_MESSAGE.to_string()),
            ));
        }
        Ok(parsed.foods)
    }
}

/// Strip the `/predict` route to get the backend root.
fn base_url(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    trimmed
        .strip_suffix("/predict")
        .unwrap_or(trimmed)
        .to_string()
}

async fn post_image(
    client: reqwest::Client,
    endpoint: String,
    jpeg_bytes: Vec<u8>,
) -> ClassificationOutcome {
    let part = match multipart::Part::bytes(jpeg_bytes)
        .file_name(UPLOAD_FILENAME)
        .mime_str(UPLOAD_MIME)
    {
        Ok(part) => part,
        Err(e) => return transport_failure(&e),
    };
    let form = multipart::Form::new().part(UPLOAD_FIELD, part);

    let response = match client.post(&endpoint).multipart(form).send().await {
        Ok(response) => response,
        Err(e) => return transport_failure(&e),
    };

    let status = response.status();
    match response.text().await {
        Ok(body) => interpret_response(status, &body),
        Err(e) => transport_failure(&e),
    }
}

fn transport_failure(e: &reqwest::Error) -> ClassificationOutcome {
    if e.is_connect() {
        ClassificationOutcome::remote_failure(FailureKind::NoConnectivity, NO_CONNECTIVITY_MESSAGE)
    } else if e.is_timeout() {
        ClassificationOutcome::remote_failure(FailureKind::Timeout, TIMEOUT_MESSAGE)
    } else {
        ClassificationOutcome::remote_failure(FailureKind::Network, format!("Network error: {e}"))
    }
}

/// Map a backend reply onto an outcome. Error statuses still carry a
/// `{success: false, error}` body, so the body is parsed first.
fn interpret_response(status: StatusCode, body: &str) -> ClassificationOutcome {
    let parsed: PredictResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) if !status.is_success() => {
            return ClassificationOutcome::remote_failure(
                FailureKind::BackendRejection,
                format!("Server error ({})", status.as_u16()),
            );
        }
        Err(_) => {
            return ClassificationOutcome::remote_failure(
                FailureKind::BackendRejection,
                INVALID_RESPONSE_MESSAGE,
            );
        }
    };

    if !parsed.success {
        return ClassificationOutcome::remote_failure(
            FailureKind::BackendRejection,
            parsed
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| REJECTION_DEFAULT_MESSAGE.to_string()),
        );
    }

    let Some(food_name) = parsed.food.filter(|f| !f.trim().is_empty()) else {
        return ClassificationOutcome::remote_failure(
            FailureKind::BackendRejection,
            INVALID_RESPONSE_MESSAGE,
        );
    };

    ClassificationOutcome::RemoteSuccess {
        food_name,
        confidence: parsed.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
        nutrition: parsed.nutrition.unwrap_or_else(NutritionRecord::unknown),
        recommendation: parsed.recommendation,
        top_predictions: parsed.top_predictions,
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
