//! Classifier strategies, selected once at startup.

pub mod on_device;
pub mod remote;

pub use on_device::*;
pub use remote::*;

use std::sync::Arc;

use crate::config::RecognizerConfig;
use crate::models::{ClassificationOutcome, StrategyKind};
use crate::pipeline::preprocess::{PreparedImage, TargetSpec};
use crate::pipeline::ClassifierError;

/// The active inference strategy.
pub enum Classifier {
    Remote(RemoteClassifier),
    OnDevice(OnDeviceClassifier),
}

impl Classifier {
    /// Build the configured strategy. On-device uses the default tensor
    /// runtime; call [`Classifier::warm_up`] before classifying.
    pub fn from_config(config: &RecognizerConfig) -> Result<Self, ClassifierError> {
        match config.strategy {
            StrategyKind::Remote => Ok(Self::Remote(RemoteClassifier::new(
                &config.endpoint,
                config.timeout(),
            )?)),
            StrategyKind::OnDevice => Self::on_device(config, default_backend()?),
        }
    }

    /// On-device strategy over an explicit backend.
    pub fn on_device(
        config: &RecognizerConfig,
        backend: Arc<dyn InferenceBackend>,
    ) -> Result<Self, ClassifierError> {
        let runtime = OnDeviceRuntime::new(backend, config.tensor_layout)?;
        Ok(Self::OnDevice(OnDeviceClassifier::new(runtime, &config.model_url)))
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Remote(_) => StrategyKind::Remote,
            Self::OnDevice(_) => StrategyKind::OnDevice,
        }
    }

    /// The exact input shape this strategy accepts.
    pub fn target_spec(&self, config: &RecognizerConfig) -> TargetSpec {
        match self {
            Self::Remote(_) => TargetSpec::remote(config.remote_width, config.remote_quality),
            Self::OnDevice(_) => TargetSpec::on_device(),
        }
    }

    /// Remote is always ready; on-device once the model is loaded.
    pub fn is_ready(&self) -> bool {
        match self {
            Self::Remote(_) => true,
            Self::OnDevice(c) => c.is_ready(),
        }
    }

    /// One-time model load for on-device; no-op for remote.
    pub async fn warm_up(&self) -> Result<(), ClassifierError> {
        match self {
            Self::Remote(_) => Ok(()),
            Self::OnDevice(c) => c.warm_up().await,
        }
    }

    /// `None` only when on-device classification is unavailable.
    pub async fn classify(&self, prepared: PreparedImage) -> Option<ClassificationOutcome> {
        match self {
            Self::Remote(c) => Some(c.classify(prepared).await),
            Self::OnDevice(c) => c.classify(prepared).await,
        }
    }
}
