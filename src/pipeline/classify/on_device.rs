//! On-device classification with a local image-classification model.
//!
//! Lifecycle: `setup()` once, then `load_model()` once, then any number of
//! `classify()` calls against the returned handle. The model's numerics are
//! opaque behind [`ImageModel`]; the production ONNX Runtime backend lives
//! behind the `on-device` feature.

use std::sync::{Arc, Mutex};

use image::{GenericImageView, ImageFormat};
use ndarray::Array4;
use tokio::sync::OnceCell;
use tracing::{info, info_span, warn, Instrument};

use crate::models::{ClassificationOutcome, TensorLayout};
use crate::pipeline::preprocess::PreparedImage;
use crate::pipeline::ClassifierError;

// ═══════════════════════════════════════════════════════════
// Traits
// ═══════════════════════════════════════════════════════════

/// A loaded model: one batched image tensor in, one logit per class out.
pub trait ImageModel: Send + Sync {
    fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError>;
}

/// Tensor runtime that turns serialized model bytes into an [`ImageModel`].
pub trait InferenceBackend: Send + Sync {
    /// One-time runtime initialization.
    fn initialize(&self) -> Result<(), ClassifierError>;

    fn load(&self, model_bytes: &[u8]) -> Result<Arc<dyn ImageModel>, ClassifierError>;
}

/// A loaded model, cheap to clone. Held for the process lifetime.
#[derive(Clone)]
pub struct ModelHandle {
    model: Arc<dyn ImageModel>,
    source: String,
}

impl ModelHandle {
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════
// Runtime
// ═══════════════════════════════════════════════════════════

pub struct OnDeviceRuntime {
    backend: Arc<dyn InferenceBackend>,
    client: reqwest::Client,
    layout: TensorLayout,
    initialized: OnceCell<()>,
}

impl OnDeviceRuntime {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        layout: TensorLayout,
    ) -> Result<Self, ClassifierError> {
        Ok(Self {
            backend,
            client: reqwest::Client::builder().build()?,
            layout,
            initialized: OnceCell::new(),
        })
    }

    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    /// Initialize the runtime. Idempotent.
    pub async fn setup(&self) -> Result<(), ClassifierError> {
        self.initialized
            .get_or_try_init(|| async {
                let backend = Arc::clone(&self.backend);
                tokio::task::spawn_blocking(move || backend.initialize()).await??;
                info!("Tensor runtime ready");
                Ok::<(), ClassifierError>(())
            })
            .await?;
        Ok(())
    }

    pub fn is_setup(&self) -> bool {
        self.initialized.initialized()
    }

    /// Fetch and deserialize the model graph.
    ///
    /// `url` is an `http(s)://` URL, a `file://` URL or a plain path.
    pub async fn load_model(&self, url: &str) -> Result<ModelHandle, ClassifierError> {
        if !self.is_setup() {
            return Err(ClassifierError::NotReady(
                "runtime setup has not completed".into(),
            ));
        }

        let span = info_span!("load_model", source = %url);
        async {
            let bytes = self.fetch_model(url).await?;
            let size = bytes.len();
            let backend = Arc::clone(&self.backend);
            let model = tokio::task::spawn_blocking(move || backend.load(&bytes)).await??;
            info!(size, "Model loaded");
            Ok::<_, ClassifierError>(ModelHandle {
                model,
                source: url.to_string(),
            })
        }
        .instrument(span)
        .await
    }

    async fn fetch_model(&self, url: &str) -> Result<Vec<u8>, ClassifierError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            let response = self
                .client
                .get(url)
                .send()
                .await?
                .error_for_status()
                .map_err(|e| ClassifierError::ModelDownload(e.to_string()))?;
            return Ok(response.bytes().await?.to_vec());
        }

        let path = url.strip_prefix("file://").unwrap_or(url);
        tokio::fs::read(path)
            .await
            .map_err(|e| ClassifierError::ModelDownload(format!("{path}: {e}")))
    }

    /// Run one image through the model.
    ///
    /// `None` means classification is unavailable for this image; the cause
    /// is logged. Tensors live only inside the blocking task.
    pub async fn classify(
        &self,
        handle: &ModelHandle,
        prepared: PreparedImage,
    ) -> Option<ClassificationOutcome> {
        let model = Arc::clone(&handle.model);
        let layout = self.layout;
        let joined = tokio::task::spawn_blocking(move || {
            run_inference(model.as_ref(), &prepared.jpeg_bytes, layout)
        })
        .await;

        match joined {
            Ok(Ok((class_index, confidence))) => {
                info!(class_index, confidence, "On-device classification complete");
                Some(ClassificationOutcome::OnDeviceResult {
                    class_index,
                    confidence,
                })
            }
            Ok(Err(e)) => {
                warn!(error = %e, "On-device classification unavailable");
                None
            }
            Err(e) => {
                warn!(error = %e, "On-device inference task failed");
                None
            }
        }
    }
}

/// Decode, normalize, forward, softmax, argmax.
pub fn run_inference(
    model: &dyn ImageModel,
    jpeg_bytes: &[u8],
    layout: TensorLayout,
) -> Result<(usize, f32), ClassifierError> {
    let input = jpeg_to_tensor(jpeg_bytes, layout)?;
    let logits = model.forward(&input)?;
    let probabilities = softmax(&logits);
    argmax(&probabilities)
        .ok_or_else(|| ClassifierError::Inference("model produced no usable scores".into()))
}

/// Decode a JPEG into a `[1, H, W, 3]` or `[1, 3, H, W]` tensor in [-1, 1].
pub fn jpeg_to_tensor(jpeg_bytes: &[u8], layout: TensorLayout) -> Result<Array4<f32>, ClassifierError> {
    let img = image::load_from_memory_with_format(jpeg_bytes, ImageFormat::Jpeg)
        .map_err(|e| ClassifierError::Tensor(format!("JPEG decode failed: {e}")))?;
    let (w, h) = img.dimensions();
    let rgb = img.to_rgb8();

    let pixel = |x: usize, y: usize, c: usize| normalize_channel(rgb.get_pixel(x as u32, y as u32)[c]);
    let tensor = match layout {
        TensorLayout::Nhwc => {
            Array4::from_shape_fn((1, h as usize, w as usize, 3), |(_, y, x, c)| pixel(x, y, c))
        }
        TensorLayout::Nchw => {
            Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| pixel(x, y, c))
        }
    };
    Ok(tensor)
}

/// Map a 0..=255 channel value onto [-1, 1].
pub fn normalize_channel(value: u8) -> f32 {
    value as f32 / 127.5 - 1.0
}

/// Numerically stable softmax. A `+inf` logit takes all the mass.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if let Some(winner) = logits.iter().position(|v| *v == f32::INFINITY) {
        return (0..logits.len())
            .map(|i| if i == winner { 1.0 } else { 0.0 })
            .collect();
    }

    let max = logits
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return Vec::new();
    }

    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().filter(|v| v.is_finite()).sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// Index and value of the highest score. Ties go to the lowest index.
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .fold(None, |best, (i, v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((i, v)),
        })
}

// ═══════════════════════════════════════════════════════════
// Caller side: cached handle and readiness
// ═══════════════════════════════════════════════════════════

/// Owns the runtime and the process-lifetime model handle.
pub struct OnDeviceClassifier {
    runtime: OnDeviceRuntime,
    model_url: String,
    handle: OnceCell<ModelHandle>,
}

impl OnDeviceClassifier {
    pub fn new(runtime: OnDeviceRuntime, model_url: &str) -> Self {
        Self {
            runtime,
            model_url: model_url.to_string(),
            handle: OnceCell::new(),
        }
    }

    /// Set up the runtime and load the model once. Later calls are no-ops.
    pub async fn warm_up(&self) -> Result<(), ClassifierError> {
        self.handle
            .get_or_try_init(|| async {
                self.runtime.setup().await?;
                self.runtime.load_model(&self.model_url).await
            })
            .await?;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.handle.initialized()
    }

    pub async fn classify(&self, prepared: PreparedImage) -> Option<ClassificationOutcome> {
        let Some(handle) = self.handle.get() else {
            warn!("On-device classify called before the model finished loading");
            return None;
        };
        self.runtime.classify(handle, prepared).await
    }
}

// ═══════════════════════════════════════════════════════════
// ONNX Runtime backend (`on-device` feature)
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "on-device")]
mod onnx {
    use super::{ClassifierError, ImageModel, InferenceBackend};
    use ndarray::Array4;
    use ort::session::Session;
    use std::sync::{Arc, Mutex};

    /// ONNX Runtime session for a single-input, single-output classifier.
    ///
    /// Mutex because `Session::run` takes `&mut self` while `ImageModel`
    /// exposes `&self`.
    pub struct OnnxImageModel {
        session: Mutex<Session>,
    }

    impl ImageModel for OnnxImageModel {
        fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
            use ort::value::TensorRef;

            let tensor = TensorRef::from_array_view(input)
                .map_err(|e| ClassifierError::Tensor(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| ClassifierError::Inference("Session lock poisoned".to_string()))?;

            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(|e| ClassifierError::Inference(format!("ONNX inference failed: {e}")))?;

            let (_shape, logits) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| ClassifierError::Inference(format!("Output extraction: {e}")))?;

            Ok(logits.to_vec())
        }
    }

    pub struct OrtBackend;

    impl InferenceBackend for OrtBackend {
        /// Fails when the ONNX Runtime library cannot be loaded.
        fn initialize(&self) -> Result<(), ClassifierError> {
            Session::builder()
                .map(|_| ())
                .map_err(|e: ort::Error| ClassifierError::RuntimeInit(e.to_string()))
        }

        fn load(&self, model_bytes: &[u8]) -> Result<Arc<dyn ImageModel>, ClassifierError> {
            let session = Session::builder()
                .map_err(|e: ort::Error| ClassifierError::ModelLoad(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| ClassifierError::ModelLoad(e.to_string()))?
                .commit_from_memory(model_bytes)
                .map_err(|e: ort::Error| ClassifierError::ModelLoad(format!("ONNX load failed: {e}")))?;

            Ok(Arc::new(OnnxImageModel {
                session: Mutex::new(session),
            }))
        }
    }
}

#[cfg(feature = "on-device")]
pub use onnx::{OnnxImageModel, OrtBackend};

/// Backend used when nothing else is injected.
#[cfg(feature = "on-device")]
pub fn default_backend() -> Result<Arc<dyn InferenceBackend>, ClassifierError> {
    Ok(Arc::new(OrtBackend))
}

#[cfg(not(feature = "on-device"))]
pub fn default_backend() -> Result<Arc<dyn InferenceBackend>, ClassifierError> {
    Err(ClassifierError::RuntimeInit(
        "built without the `on-device` feature".into(),
    ))
}

// ═══════════════════════════════════════════════════════════
// Mocks
// ═══════════════════════════════════════════════════════════

/// Returns fixed logits and records the shape of the last input.
pub struct MockImageModel {
    logits: Vec<f32>,
    last_shape: Mutex<Option<Vec<usize>>>,
}

impl MockImageModel {
    pub fn new(logits: Vec<f32>) -> Self {
        Self {
            logits,
            last_shape: Mutex::new(None),
        }
    }

    /// Logits of length `classes` with a single peak at `class_index`.
    pub fn peaked(classes: usize, class_index: usize, peak: f32) -> Self {
        let mut logits = vec![0.0; classes];
        if let Some(slot) = logits.get_mut(class_index) {
            *slot = peak;
        }
        Self::new(logits)
    }

    pub fn last_shape(&self) -> Option<Vec<usize>> {
        self.last_shape.lock().ok().and_then(|s| s.clone())
    }
}

impl ImageModel for MockImageModel {
    fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
        if let Ok(mut shape) = self.last_shape.lock() {
            *shape = Some(input.shape().to_vec());
        }
        Ok(self.logits.clone())
    }
}

/// Hands out one shared [`MockImageModel`] for any model bytes.
pub struct MockInferenceBackend {
    model: Arc<MockImageModel>,
    fail_load: bool,
}

impl MockInferenceBackend {
    pub fn new(model: Arc<MockImageModel>) -> Self {
        Self {
            model,
            fail_load: false,
        }
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }
}

impl InferenceBackend for MockInferenceBackend {
    fn initialize(&self) -> Result<(), ClassifierError> {
        Ok(())
    }

    fn load(&self, _model_bytes: &[u8]) -> Result<Arc<dyn ImageModel>, ClassifierError> {
        if self.fail_load {
            return Err(ClassifierError::ModelLoad("mock load failure".into()));
        }
        Ok(self.model.clone())
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
