//! # Structured Logging Module
//!
//! Installs the process-wide `tracing` subscriber. The library itself only
//! emits events and spans; binaries and test harnesses call
//! [`init_structured_logging`] once at startup.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with console output and an optional JSON layer
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let console = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(!config.json)
            .with_filter(env_filter(&config.level));

        let json = config.json.then(|| {
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_filter(env_filter(&config.level))
        });

        // Use try_init to avoid panic if global subscriber already set
        let result = tracing_subscriber::registry()
            .with(console)
            .with(json)
            .try_init();

        if result.is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
            return;
        }

        tracing::info!(
            level = %config.level,
            json = config.json,
            "Structured logging initialized"
        );
    });
}

/// `RUST_LOG` wins over the configured level so operators can raise verbosity without a redeploy
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}
