//! Tracing bootstrap for embedding applications.
//!
//! The host application usually installs its own subscriber; these helpers
//! exist for standalone tools and tests. Filtering honors `FLOWSMITH_LOG`,
//! then `RUST_LOG`, then defaults to `info`. A `.env` file is loaded first
//! so local overrides apply without exporting anything.

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "FLOWSMITH_LOG";

fn env_filter() -> EnvFilter {
    dotenvy::dotenv().ok();
    let directives = std::env::var(LOG_ENV_VAR)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    EnvFilter::new(directives)
}

/// Install the default subscriber; errors if one is already set.
pub fn try_init() -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .with(ErrorLayer::default())
        .try_init()
}

/// Install the default subscriber, ignoring an already-installed one.
pub fn init() {
    let _ = try_init();
}
