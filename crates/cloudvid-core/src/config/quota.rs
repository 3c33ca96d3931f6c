//! Daily upload budget configuration.

use serde::{Deserialize, Serialize};

/// Platform upload quota settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Units available per window.
    #[serde(default = "default_budget")]
    pub budget_units: u32,
    /// Units reserved for one upload attempt.
    #[serde(default = "default_upload_cost")]
    pub upload_cost_units: u32,
    /// Length of a budget window in hours.
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
    /// Fixed UTC offset, in minutes, of the wall clock whose midnight
    /// starts a window. The platform resets at Pacific midnight.
    #[serde(default = "default_reset_offset")]
    pub reset_utc_offset_minutes: i32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            budget_units: default_budget(),
            upload_cost_units: default_upload_cost(),
            window_hours: default_window_hours(),
            reset_utc_offset_minutes: default_reset_offset(),
        }
    }
}

fn default_budget() -> u32 {
    10_000
}

fn default_upload_cost() -> u32 {
    1_600
}

fn default_window_hours() -> u32 {
    24
}

fn default_reset_offset() -> i32 {
    -8 * 60
}
