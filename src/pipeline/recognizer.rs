//! Single pipeline entry point: raw photo in, `PipelineOutcome` out.
//!
//! Failures come back as values so the caller can render a retry
//! affordance; nothing in here returns `Err`.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use crate::config::RecognizerConfig;
use crate::models::{ClassificationOutcome, FailureKind, FoodResult};

use super::acquire::RawImage;
use super::classify::Classifier;
use super::guard::RequestGuard;
use super::preprocess::{ImagePreprocessor, JpegPreprocessor, PreparedImage, TargetSpec};
use super::resolve::ResultResolver;
use super::ClassifierError;

const UNAVAILABLE_MESSAGE: &str = "Classification unavailable";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl PipelineFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Retrying the same photo can help (everything but preprocessing).
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Recognized(FoodResult),
    Failed(PipelineFailure),
    /// On-device model still loading.
    ModelNotReady,
    /// Another recognition is in flight.
    Busy,
    /// Cancelled before it finished; its result was discarded.
    Superseded,
}

impl PipelineOutcome {
    pub fn result(&self) -> Option<&FoodResult> {
        match self {
            Self::Recognized(result) => Some(result),
            _ => None,
        }
    }
}

pub struct FoodRecognizer {
    preprocessor: Arc<dyn ImagePreprocessor>,
    classifier: Classifier,
    resolver: ResultResolver,
    target: TargetSpec,
    guard: RequestGuard<PipelineOutcome>,
}

impl FoodRecognizer {
    /// Wire the pipeline around a classifier; `target` must be the
    /// classifier's input shape.
    pub fn new(classifier: Classifier, target: TargetSpec) -> Self {
        Self {
            preprocessor: Arc::new(JpegPreprocessor::default()),
            classifier,
            resolver: ResultResolver::default(),
            target,
            guard: RequestGuard::new(),
        }
    }

    pub fn from_config(config: &RecognizerConfig) -> Result<Self, ClassifierError> {
        let classifier = Classifier::from_config(config)?;
        Ok(Self::with_classifier(classifier, config))
    }

    /// Target shape derived from the strategy and the config.
    pub fn with_classifier(classifier: Classifier, config: &RecognizerConfig) -> Self {
        let target = classifier.target_spec(config);
        Self::new(classifier, target)
    }

    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn ImagePreprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_resolver(mut self, resolver: ResultResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn target(&self) -> &TargetSpec {
        &self.target
    }

    /// Gate for the capture control.
    pub fn is_ready(&self) -> bool {
        self.classifier.is_ready()
    }

    pub fn is_busy(&self) -> bool {
        self.guard.is_busy()
    }

    pub async fn warm_up(&self) -> Result<(), ClassifierError> {
        self.classifier.warm_up().await
    }

    /// Last outcome published by a request that was not cancelled.
    pub fn latest_outcome(&self) -> Option<PipelineOutcome> {
        self.guard.latest()
    }

    /// Abandon the in-flight request. Its eventual result is discarded.
    pub fn cancel(&self) {
        self.guard.reset();
    }

    /// Run one photo through preprocess → classify → resolve.
    pub async fn recognize(&self, raw: &RawImage) -> PipelineOutcome {
        if !self.classifier.is_ready() {
            return PipelineOutcome::ModelNotReady;
        }
        let Some(ticket) = self.guard.begin() else {
            return PipelineOutcome::Busy;
        };

        let span = info_span!(
            "recognize",
            strategy = %self.classifier.kind(),
            generation = ticket.generation(),
        );
        let outcome = self.run(raw).instrument(span).await;

        if ticket.finish(outcome.clone()) {
            outcome
        } else {
            PipelineOutcome::Superseded
        }
    }

    /// Decode, resize and encode on the blocking pool.
    async fn prepare(&self, raw: &RawImage) -> Result<PreparedImage, PipelineFailure> {
        let preprocessor = Arc::clone(&self.preprocessor);
        let raw = raw.clone();
        let target = self.target.clone();

        match tokio::task::spawn_blocking(move || preprocessor.prepare(&raw, &target)).await {
            Ok(Ok(prepared)) => Ok(prepared),
            Ok(Err(e)) => {
                warn!(error = %e, "Preprocessing failed");
                Err(PipelineFailure::new(FailureKind::Preprocess, e.to_string()))
            }
            Err(e) => {
                warn!(error = %e, "Preprocessing task failed");
                Err(PipelineFailure::new(FailureKind::Unavailable, UNAVAILABLE_MESSAGE))
            }
        }
    }

    async fn run(&self, raw: &RawImage) -> PipelineOutcome {
        let prepared = match self.prepare(raw).await {
            Ok(prepared) => prepared,
            Err(failure) => return PipelineOutcome::Failed(failure),
        };

        let Some(outcome) = self.classifier.classify(prepared).await else {
            return PipelineOutcome::Failed(PipelineFailure::new(
                FailureKind::Unavailable,
                UNAVAILABLE_MESSAGE,
            ));
        };

        match self.resolver.resolve(&outcome) {
            Some(result) => {
                info!(
                    food = %result.name,
                    confidence = result.confidence,
                    is_unknown = result.is_unknown,
                    "Food recognized"
                );
                PipelineOutcome::Recognized(result)
            }
            None => match outcome {
                ClassificationOutcome::RemoteFailure {
                    kind,
                    error_message,
                } => PipelineOutcome::Failed(PipelineFailure::new(kind, error_message)),
                _ => PipelineOutcome::Failed(PipelineFailure::new(
                    FailureKind::Unavailable,
                    UNAVAILABLE_MESSAGE,
                )),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Nutrient, NutritionRecord, StrategyKind, UNRECOGNIZED_NAME};
    use crate::pipeline::classify::{MockImageModel, MockInferenceBackend};
    use crate::pipeline::PreprocessError;
    use axum::routing::post;
    use axum::{Json, Router};
    use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn photo() -> RawImage {
        let img = RgbImage::from_pixel(800, 600, Rgb([240, 200, 40]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .unwrap();
        RawImage::from_bytes(cursor.into_inner()).unwrap()
    }

    async fn spawn_backend(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/predict")
    }

    fn remote_recognizer(endpoint: String, timeout: Duration) -> FoodRecognizer {
        let config = RecognizerConfig {
            endpoint,
            timeout_secs: 1,
            ..Default::default()
        };
        let classifier = Classifier::Remote(
            crate::pipeline::classify::RemoteClassifier::new(&config.endpoint, timeout).unwrap(),
        );
        FoodRecognizer::with_classifier(classifier, &config)
    }

    async fn on_device_recognizer(class_index: usize) -> (FoodRecognizer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("mobilenet.onnx");
        std::fs::write(&model_path, b"graph").unwrap();

        let config = RecognizerConfig {
            strategy: StrategyKind::OnDevice,
            model_url: model_path.to_string_lossy().into_owned(),
            ..Default::default()
        };
        let model = Arc::new(MockImageModel::peaked(1000, class_index, 8.0));
        let classifier =
            Classifier::on_device(&config, Arc::new(MockInferenceBackend::new(model))).unwrap();
        (FoodRecognizer::with_classifier(classifier, &config), dir)
    }

    fn banana_app() -> Router {
        Router::new().route(
            "/predict",
            post(|| async {
                Json(json!({
                    "success": true,
                    "food": "Banana",
                    "confidence": 0.97,
                    "nutrition": {"calories": 105, "protein": 1.3, "carbs": 27, "fat": 0.3},
                    "recommendation": "Good potassium source"
                }))
            }),
        )
    }

    #[tokio::test]
    async fn remote_banana_end_to_end() {
        let endpoint = spawn_backend(banana_app()).await;
        let recognizer = remote_recognizer(endpoint, Duration::from_secs(5));
        assert_eq!(recognizer.target().width, 640);

        let outcome = recognizer.recognize(&photo()).await;
        let result = outcome.result().expect("recognized");
        assert_eq!(result.name, "Banana");
        assert!((result.confidence - 0.97).abs() < 1e-6);
        assert!(!result.is_unknown);
        assert_eq!(result.nutrition, NutritionRecord::new(105.0, 1.3, 27.0, 0.3));
        assert_eq!(recognizer.latest_outcome(), Some(outcome));
        assert!(!recognizer.is_busy());
    }

    #[tokio::test]
    async fn remote_rejection_is_failed_outcome() {
        let app = Router::new().route(
            "/predict",
            post(|| async { Json(json!({"success": false, "error": "No food detected"})) }),
        );
        let recognizer = remote_recognizer(spawn_backend(app).await, Duration::from_secs(5));

        match recognizer.recognize(&photo()).await {
            PipelineOutcome::Failed(failure) => {
                assert_eq!(failure.kind, FailureKind::BackendRejection);
                assert_eq!(failure.message, "No food detected");
                assert!(failure.is_retryable());
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn late_response_is_never_delivered() {
        let app = Router::new().route(
            "/predict",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(800)).await;
                Json(json!({"success": true, "food": "Late Banana", "confidence": 0.9}))
            }),
        );
        let recognizer = remote_recognizer(spawn_backend(app).await, Duration::from_millis(100));

        let outcome = recognizer.recognize(&photo()).await;
        let expected = PipelineOutcome::Failed(PipelineFailure::new(FailureKind::Timeout, "Timeout"));
        assert_eq!(outcome, expected);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(recognizer.latest_outcome(), Some(expected));
        assert!(!recognizer.is_busy());
    }

    #[tokio::test]
    async fn concurrent_request_is_busy() {
        let app = Router::new().route(
            "/predict",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Json(json!({"success": true, "food": "Pizza", "confidence": 0.8}))
            }),
        );
        let recognizer = remote_recognizer(spawn_backend(app).await, Duration::from_secs(5));
        let raw = photo();

        let (first, second) = tokio::join!(recognizer.recognize(&raw), recognizer.recognize(&raw));
        assert!(matches!(first, PipelineOutcome::Recognized(_)));
        assert_eq!(second, PipelineOutcome::Busy);
    }

    #[tokio::test]
    async fn cancelled_request_cannot_overwrite_fresh_one() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let app = Router::new().route(
            "/predict",
            post(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    let food = if n == 0 { "Old" } else { "New" };
                    Json(json!({"success": true, "food": food, "confidence": 0.5}))
                }
            }),
        );
        let recognizer = remote_recognizer(spawn_backend(app).await, Duration::from_secs(5));
        let raw = photo();

        let (stale, fresh) = tokio::join!(recognizer.recognize(&raw), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            recognizer.cancel();
            recognizer.recognize(&raw).await
        });

        assert_eq!(stale, PipelineOutcome::Superseded);
        assert_eq!(fresh.result().map(|r| r.name.as_str()), Some("New"));
        assert_eq!(recognizer.latest_outcome(), Some(fresh));
    }

    #[tokio::test]
    async fn undecodable_photo_is_preprocess_failure() {
        let recognizer = remote_recognizer("http://127.0.0.1:9/predict".into(), Duration::from_secs(1));
        let raw = RawImage::from_bytes(vec![0x11; 256]).unwrap();

        match recognizer.recognize(&raw).await {
            PipelineOutcome::Failed(failure) => {
                assert_eq!(failure.kind, FailureKind::Preprocess);
                assert!(!failure.is_retryable());
            }
            other => panic!("expected preprocess failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn on_device_requires_loaded_model() {
        let (recognizer, _dir) = on_device_recognizer(954).await;
        assert!(!recognizer.is_ready());
        assert_eq!(recognizer.recognize(&photo()).await, PipelineOutcome::ModelNotReady);
    }

    #[tokio::test]
    async fn on_device_hit_resolves_from_table() {
        let (recognizer, _dir) = on_device_recognizer(954).await;
        recognizer.warm_up().await.unwrap();
        assert!(recognizer.is_ready());
        assert_eq!(recognizer.target(), &TargetSpec::on_device());

        let outcome = recognizer.recognize(&photo()).await;
        let result = outcome.result().expect("recognized");
        assert_eq!(result.name, "Pisang (V1)");
        assert_eq!(result.nutrition.calories, Nutrient::Known(105.0));
        assert_eq!(result.nutrition.protein.as_grams(), "1.3g");
        assert!(!result.is_unknown);
    }

    #[tokio::test]
    async fn on_device_miss_is_unrecognized() {
        let (recognizer, _dir) = on_device_recognizer(1).await;
        recognizer.warm_up().await.unwrap();

        let outcome = recognizer.recognize(&photo()).await;
        let result = outcome.result().expect("a miss is still a result");
        assert_eq!(result.name, UNRECOGNIZED_NAME);
        assert!(result.is_unknown);
        assert!(result.nutrition.is_fully_unknown());
    }

    /// Holds its thread like a large decode would, then prepares normally.
    struct SlowPreprocessor;

    impl ImagePreprocessor for SlowPreprocessor {
        fn prepare(
            &self,
            raw: &RawImage,
            target: &TargetSpec,
        ) -> Result<PreparedImage, PreprocessError> {
            std::thread::sleep(Duration::from_millis(300));
            JpegPreprocessor::default().prepare(raw, target)
        }
    }

    struct PanickingPreprocessor;

    impl ImagePreprocessor for PanickingPreprocessor {
        fn prepare(&self, _: &RawImage, _: &TargetSpec) -> Result<PreparedImage, PreprocessError> {
            panic!("decoder crashed");
        }
    }

    #[tokio::test]
    async fn preprocessing_leaves_runtime_responsive() {
        let recognizer = remote_recognizer(spawn_backend(banana_app()).await, Duration::from_secs(5))
            .with_preprocessor(Arc::new(SlowPreprocessor));

        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let outcome = recognizer.recognize(&photo()).await;
        ticker.abort();

        assert!(matches!(outcome, PipelineOutcome::Recognized(_)));
        assert!(ticks.load(Ordering::SeqCst) >= 10);
    }

    #[tokio::test]
    async fn crashed_preprocessing_is_unavailable() {
        let recognizer = remote_recognizer("http://127.0.0.1:9/predict".into(), Duration::from_secs(1))
            .with_preprocessor(Arc::new(PanickingPreprocessor));

        assert_eq!(
            recognizer.recognize(&photo()).await,
            PipelineOutcome::Failed(PipelineFailure::new(
                FailureKind::Unavailable,
                UNAVAILABLE_MESSAGE
            ))
        );
        assert!(!recognizer.is_busy());
    }

    #[tokio::test]
    async fn extreme_aspect_photo_is_preprocess_failure() {
        let recognizer = remote_recognizer("http://127.0.0.1:9/predict".into(), Duration::from_secs(1));
        let img = RgbImage::from_pixel(1, 20_000, Rgb([10, 10, 10]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .unwrap();
        let raw = RawImage::from_bytes(cursor.into_inner()).unwrap();

        match recognizer.recognize(&raw).await {
            PipelineOutcome::Failed(failure) => assert_eq!(failure.kind, FailureKind::Preprocess),
            other => panic!("expected preprocess failure, got {other:?}"),
        }
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(PipelineOutcome::Busy).unwrap();
        assert_eq!(json["status"], "busy");

        let failed = PipelineOutcome::Failed(PipelineFailure::new(FailureKind::Timeout, "Timeout"));
        let json = serde_json::to_value(failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "timeout");
    }
}
