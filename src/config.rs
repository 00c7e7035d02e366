use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{StrategyKind, TensorLayout};

/// Application-level constants
pub const APP_NAME: &str = "FoodLens";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Classification backend endpoint used when nothing is configured.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:5000/predict";

/// MobileNetV2 (ImageNet, 1000 classes) served as a single ONNX graph.
pub const DEFAULT_MODEL_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/classification/mobilenet/model/mobilenetv2-12.onnx";

pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_REMOTE_WIDTH: u32 = 640;
pub const DEFAULT_REMOTE_QUALITY: f32 = 0.8;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Cannot determine home directory")]
    NoHomeDir,
}

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "foodlens=info,warn"
}

/// Get the application data directory
/// ~/FoodLens/ on all platforms
pub fn app_data_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(APP_NAME))
}

/// Default location of the history database.
pub fn default_history_db_path() -> Result<PathBuf, ConfigError> {
    Ok(app_data_dir()?.join("history.db"))
}

/// Everything the recognition pipeline reads at startup.
///
/// Loaded from JSON (all fields optional) and then overridden by
/// `FOODLENS_*` environment variables. These are deployment constants,
/// not per-request options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub strategy: StrategyKind,
    pub endpoint: String,
    pub timeout_secs: u64,
    pub remote_width: u32,
    /// JPEG quality in (0, 1].
    pub remote_quality: f32,
    pub model_url: String,
    pub tensor_layout: TensorLayout,
    /// `None` means [`default_history_db_path`].
    pub history_db_path: Option<PathBuf>,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Remote,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            remote_width: DEFAULT_REMOTE_WIDTH,
            remote_quality: DEFAULT_REMOTE_QUALITY,
            model_url: DEFAULT_MODEL_URL.to_string(),
            tensor_layout: TensorLayout::Nchw,
            history_db_path: None,
        }
    }
}

impl RecognizerConfig {
    /// Load from a JSON file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// `load` with an explicit override lookup.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                serde_json::from_str(&text)?
            }
            None => Self::default(),
        };
        let config = base.with_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FOODLENS_STRATEGY") {
            self.strategy = StrategyKind::from_str(v.trim())?;
        }
        if let Some(v) = lookup("FOODLENS_ENDPOINT") {
            self.endpoint = v.trim().to_string();
        }
        if let Some(v) = lookup("FOODLENS_TIMEOUT_SECS") {
            self.timeout_secs = parse_field("FOODLENS_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("FOODLENS_REMOTE_WIDTH") {
            self.remote_width = parse_field("FOODLENS_REMOTE_WIDTH", &v)?;
        }
        if let Some(v) = lookup("FOODLENS_REMOTE_QUALITY") {
            self.remote_quality = parse_field("FOODLENS_REMOTE_QUALITY", &v)?;
        }
        if let Some(v) = lookup("FOODLENS_MODEL_URL") {
            self.model_url = v.trim().to_string();
        }
        if let Some(v) = lookup("FOODLENS_TENSOR_LAYOUT") {
            self.tensor_layout = TensorLayout::from_str(v.trim())?;
        }
        if let Some(v) = lookup("FOODLENS_HISTORY_DB") {
            self.history_db_path = Some(PathBuf::from(v.trim()));
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs", self.timeout_secs));
        }
        if self.remote_width == 0 || self.remote_width > crate::pipeline::MAX_OUTPUT_EDGE {
            return Err(invalid("remote_width", self.remote_width));
        }
        if !(self.remote_quality > 0.0 && self.remote_quality <= 1.0) {
            return Err(invalid("remote_quality", self.remote_quality));
        }
        if self.strategy == StrategyKind::Remote && !self.endpoint.starts_with("http") {
            return Err(invalid("endpoint", &self.endpoint));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn history_db_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.history_db_path {
            Some(p) => Ok(p.clone()),
            None => default_history_db_path(),
        }
    }
}

fn parse_field<T: FromStr>(field: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| invalid(field, raw))
}

fn invalid(field: &str, value: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn app_data_dir_under_home() {
        let dir = app_data_dir().unwrap();
        let home = dirs::home_dir().unwrap();
        assert!(dir.starts_with(home));
        assert!(dir.ends_with("FoodLens"));
    }

    #[test]
    fn defaults_match_remote_contract() {
        let config = RecognizerConfig::default();
        assert_eq!(config.strategy, StrategyKind::Remote);
        assert_eq!(config.remote_width, 640);
        assert_eq!(config.timeout(), Duration::from_secs(15));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let config = RecognizerConfig::default()
            .with_overrides(env(&[
                ("FOODLENS_STRATEGY", "on_device"),
                ("FOODLENS_TIMEOUT_SECS", "3"),
                ("FOODLENS_REMOTE_QUALITY", "0.5"),
                ("FOODLENS_HISTORY_DB", "/tmp/h.db"),
            ]))
            .unwrap();
        assert_eq!(config.strategy, StrategyKind::OnDevice);
        assert_eq!(config.timeout_secs, 3);
        assert!((config.remote_quality - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.history_db_path().unwrap(), PathBuf::from("/tmp/h.db"));
    }

    #[test]
    fn bad_override_is_rejected() {
        let err = RecognizerConfig::default()
            .with_overrides(env(&[("FOODLENS_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn validate_rejects_out_of_range_quality() {
        let config = RecognizerConfig {
            remote_quality: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_oversized_remote_width() {
        let config = RecognizerConfig {
            remote_width: crate::pipeline::MAX_OUTPUT_EDGE + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: RecognizerConfig =
            serde_json::from_str(r#"{"endpoint": "http://10.0.0.2:5000/predict"}"#).unwrap();
        assert_eq!(config.endpoint, "http://10.0.0.2:5000/predict");
        assert_eq!(config.remote_width, DEFAULT_REMOTE_WIDTH);
    }

    #[test]
    fn load_reads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foodlens.json");
        std::fs::write(&path, r#"{"timeout_secs": 7, "remote_width": 512}"#).unwrap();
        let config = RecognizerConfig::load_with(Some(&path), env(&[])).unwrap();
        assert_eq!(config.remote_width, 512);
        assert_eq!(config.timeout_secs, 7);
    }

    #[test]
    fn overrides_win_over_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foodlens.json");
        std::fs::write(&path, r#"{"timeout_secs": 7}"#).unwrap();
        let config =
            RecognizerConfig::load_with(Some(&path), env(&[("FOODLENS_TIMEOUT_SECS", "2")])).unwrap();
        assert_eq!(config.timeout_secs, 2);
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
    }
}
