//! Retry backoff configuration.

use serde::{Deserialize, Serialize};

/// Exponential backoff settings for retryable failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry, in seconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_seconds: u64,
    /// Growth factor applied per previous retry.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound on a single delay, in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: u64,
    /// Retry budget for jobs enqueued without an explicit override.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: default_base_delay(),
            multiplier: default_multiplier(),
            max_delay_seconds: default_max_delay(),
            default_max_retries: default_max_retries(),
        }
    }
}

fn default_base_delay() -> u64 {
    30
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> u64 {
    3_600
}

fn default_max_retries() -> u32 {
    3
}
