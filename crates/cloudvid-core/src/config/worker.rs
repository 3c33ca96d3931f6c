//! Dispatcher (worker loop) configuration.

use serde::{Deserialize, Serialize};

/// Background dispatcher configuration.
///
/// There is deliberately no concurrency setting: the dispatcher runs at
/// most one transfer at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether the dispatcher is started by `cloudvid run`.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interval in seconds between job queue polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Move jobs stranded in an active state back to pending on startup.
    #[serde(default = "default_true")]
    pub recover_on_start: bool,
    /// Minimum progress delta (percent) between two persisted progress writes.
    #[serde(default = "default_progress_step")]
    pub progress_step_percent: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: default_poll_interval(),
            recover_on_start: true,
            progress_step_percent: default_progress_step(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    5
}

fn default_progress_step() -> f64 {
    1.0
}
