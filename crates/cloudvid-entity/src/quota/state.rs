//! Upload budget window state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Consumed-vs-available budget for the current window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct QuotaState {
    /// Scope the budget applies to (one platform account).
    pub scope: String,
    /// Start of the current window.
    pub window_start: DateTime<Utc>,
    /// Units consumed in the current window.
    pub consumed_units: i64,
    /// Units available per window.
    pub budget_units: i64,
}

impl QuotaState {
    /// A fresh, unconsumed window.
    pub fn new(scope: impl Into<String>, window_start: DateTime<Utc>, budget_units: i64) -> Self {
        Self {
            scope: scope.into(),
            window_start,
            consumed_units: 0,
            budget_units,
        }
    }

    /// Units left in the current window.
    pub fn remaining_units(&self) -> i64 {
        (self.budget_units - self.consumed_units).max(0)
    }

    /// Whether reserving `units` more would stay within the budget.
    pub fn can_afford(&self, units: i64) -> bool {
        self.consumed_units + units <= self.budget_units
    }

    /// End of the current window for a window of the given length.
    pub fn window_end(&self, window: Duration) -> DateTime<Utc> {
        self.window_start + window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_afford_is_inclusive() {
        let mut state = QuotaState::new("default", Utc::now(), 5);
        state.consumed_units = 4;
        assert!(state.can_afford(1));
        assert!(!state.can_afford(2));
        assert_eq!(state.remaining_units(), 1);
    }

    #[test]
    fn test_remaining_never_negative() {
        let mut state = QuotaState::new("default", Utc::now(), 5);
        state.consumed_units = 9;
        assert_eq!(state.remaining_units(), 0);
    }
}
