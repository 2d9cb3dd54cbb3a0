//! Configuration Loader
//!
//! Environment-aware loading: `iam.toml`, then `iam.<environment>.toml`, then
//! `IAM__`-prefixed environment variables, each layer overriding the previous.

use super::error::{ConfigResult, ConfigurationError};
use super::CoreConfig;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

impl CoreConfig {
    /// Load configuration from `./config` with environment auto-detection
    pub fn load() -> ConfigResult<Self> {
        Self::load_from_directory_with_env(&default_config_directory(), &detect_environment())
    }

    /// Load configuration from a specific directory with an explicit environment.
    /// Useful in tests where mutating process environment variables is not an option.
    pub fn load_from_directory_with_env(config_dir: &Path, environment: &str) -> ConfigResult<Self> {
        debug!(
            environment = %environment,
            config_dir = %config_dir.display(),
            "Loading configuration"
        );

        let base = config_dir.join("iam");
        let overlay = config_dir.join(format!("iam.{environment}"));

        let config: CoreConfig = config::Config::builder()
            .add_source(config::File::with_name(&base.to_string_lossy()).required(false))
            .add_source(config::File::with_name(&overlay.to_string_lossy()).required(false))
            .add_source(
                config::Environment::with_prefix("IAM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|built| built.try_deserialize())
            .map_err(|e| ConfigurationError::LoadFailed {
                environment: environment.to_string(),
                error: e.to_string(),
            })?;

        config.validate()?;

        debug!(
            environment = %environment,
            max_connections = config.database.max_connections,
            tracing_enabled = config.pipeline.tracing_enabled,
            "Configuration loaded successfully"
        );

        Ok(config)
    }
}

/// Get current environment from environment variables
pub fn detect_environment() -> String {
    env::var("IAM_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn default_config_directory() -> PathBuf {
    PathBuf::from("config")
}
