pub mod config;
pub mod db;
pub mod history;
pub mod models;
pub mod pipeline;
pub mod session;

use tracing_subscriber::EnvFilter;

/// Initialize tracing once for the process. `RUST_LOG` overrides the
/// default filter. Later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}

pub fn version() -> &'static str {
    config::APP_VERSION
}
