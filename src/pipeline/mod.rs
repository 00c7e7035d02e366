pub mod acquire;
pub mod preprocess;
pub mod classify;
pub mod lookup;
pub mod recommend;
pub mod resolve;
pub mod guard;
pub mod recognizer;

pub use acquire::*;
pub use preprocess::*;
pub use classify::*;
pub use lookup::*;
pub use resolve::*;
pub use guard::*;
pub use recognizer::*;

use thiserror::Error;

/// Fatal to the current attempt; the user has to supply another photo.
#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid source image: {0}")]
    InvalidSource(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("JPEG encoding failed: {0}")]
    Encode(String),

    #[error("Invalid target specification: {0}")]
    InvalidTarget(String),
}

/// Internal to the classifier strategies. Never crosses the pipeline
/// boundary: remote errors become `RemoteFailure` outcomes and on-device
/// errors become "classification unavailable".
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Runtime initialization failed: {0}")]
    RuntimeInit(String),

    #[error("Model download failed: {0}")]
    ModelDownload(String),

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Tensor error: {0}")]
    Tensor(String),

    #[error("Classifier not ready: {0}")]
    NotReady(String),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}
