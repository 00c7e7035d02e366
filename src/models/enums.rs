use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(ConfigError::InvalidValue {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(StrategyKind {
    Remote => "remote",
    OnDevice => "on_device",
});

str_enum!(TensorLayout {
    Nhwc => "nhwc",
    Nchw => "nchw",
});

str_enum!(FailureKind {
    Preprocess => "preprocess",
    Timeout => "timeout",
    NoConnectivity => "no_connectivity",
    Network => "network",
    BackendRejection => "backend_rejection",
    Unavailable => "unavailable",
});

impl FailureKind {
    /// Whether re-running the same image through the pipeline can help.
    /// Preprocessing failures need a new photo instead.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Preprocess)
    }
}
