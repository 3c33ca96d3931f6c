//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section.

pub mod database;
pub mod logging;
pub mod quota;
pub mod retry;
pub mod transfer;
pub mod worker;

use serde::{Deserialize, Serialize};

pub use self::database::DatabaseConfig;
pub use self::logging::{LogFormat, LoggingConfig};
pub use self::quota::QuotaConfig;
pub use self::retry::RetryConfig;
pub use self::transfer::{CHUNK_GRANULARITY, TransferConfig};
pub use self::worker::WorkerConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// Top-level deserialization target for the merged TOML configuration
/// files (default.toml + environment overlay + `CLOUDVID__` variables).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database connection settings.
    pub database: DatabaseConfig,
    /// Dispatcher settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Transfer pipeline settings.
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Upload budget settings.
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Retry backoff settings.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges the default configuration with an environment-specific overlay
    /// and environment variables prefixed with `CLOUDVID__`.
    pub fn load(config_dir: &str, env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(&format!("{config_dir}/default")).required(false))
            .add_source(config::File::with_name(&format!("{config_dir}/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("CLOUDVID")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the engine misbehave.
    pub fn validate(&self) -> Result<(), AppError> {
        let transfer = &self.transfer;
        if transfer.chunk_size_bytes == 0 || transfer.chunk_size_bytes % CHUNK_GRANULARITY != 0 {
            return Err(AppError::configuration(format!(
                "transfer.chunk_size_bytes must be a positive multiple of {CHUNK_GRANULARITY}"
            )));
        }
        if transfer.warn_file_size_bytes > transfer.max_file_size_bytes {
            return Err(AppError::configuration(
                "transfer.warn_file_size_bytes must not exceed transfer.max_file_size_bytes",
            ));
        }
        if self.quota.window_hours == 0 {
            return Err(AppError::configuration("quota.window_hours must be positive"));
        }
        if self.retry.multiplier < 1.0 {
            return Err(AppError::configuration("retry.multiplier must be at least 1.0"));
        }
        if self.worker.poll_interval_seconds == 0 {
            return Err(AppError::configuration(
                "worker.poll_interval_seconds must be positive",
            ));
        }
        Ok(())
    }
}
