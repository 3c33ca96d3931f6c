//! Daily upload budget tracker.
//!
//! Windows are aligned to local midnight of a fixed UTC offset (for a 24h
//! window) and roll over lazily: every access first checks whether the
//! clock has crossed into a new window.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use cloudvid_core::config::QuotaConfig;
use cloudvid_core::error::AppError;
use cloudvid_core::result::AppResult;
use cloudvid_core::traits::Clock;
use cloudvid_database::QuotaStore;
use cloudvid_entity::quota::QuotaState;

/// Scope name of the single platform account budget.
pub const DEFAULT_SCOPE: &str = "default";

/// Snapshot of the current window for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaWindow {
    /// Units consumed (or reserved) in this window.
    pub consumed_units: i64,
    /// Units available per window.
    pub budget_units: i64,
    /// Units left.
    pub remaining_units: i64,
    /// Window start.
    pub window_start: DateTime<Utc>,
    /// Window end; the budget resets at this instant.
    pub window_end: DateTime<Utc>,
}

/// Units held for one upload attempt, tied to the window they were taken
/// from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// Units held.
    pub units: u32,
    /// Start of the window charged.
    pub window_start: DateTime<Utc>,
}

/// Pessimistic reservation tracker over a [`QuotaStore`].
#[derive(Debug)]
pub struct QuotaTracker {
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
    config: QuotaConfig,
    scope: String,
    /// Serializes read-modify-write cycles on the stored state.
    lock: Mutex<()>,
}

impl QuotaTracker {
    /// Create a tracker for the default scope.
    pub fn new(store: Arc<dyn QuotaStore>, clock: Arc<dyn Clock>, config: QuotaConfig) -> Self {
        Self {
            store,
            clock,
            config,
            scope: DEFAULT_SCOPE.to_string(),
            lock: Mutex::new(()),
        }
    }

    /// Units reserved for one upload attempt.
    pub fn upload_cost(&self) -> u32 {
        self.config.upload_cost_units
    }

    fn window_length(&self) -> Duration {
        Duration::hours(i64::from(self.config.window_hours.max(1)))
    }

    /// Start of the window containing `now`.
    pub fn window_start_for(&self, now: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
        let offset = i64::from(self.config.reset_utc_offset_minutes) * 60;
        let window = self.window_length().num_seconds();
        let local = now.timestamp() + offset;
        let start = local.div_euclid(window) * window - offset;
        DateTime::from_timestamp(start, 0)
            .ok_or_else(|| AppError::internal(format!("Quota window start {start} out of range")))
    }

    /// Load the state for the current window, rolling over when the clock
    /// crossed a window boundary. Caller holds the lock.
    async fn current_state(&self) -> AppResult<QuotaState> {
        let start = self.window_start_for(self.clock.now())?;
        let budget = i64::from(self.config.budget_units);

        match self.store.load(&self.scope).await? {
            Some(mut state) if state.window_start >= start => {
                state.budget_units = budget;
                Ok(state)
            }
            previous => {
                if let Some(previous) = previous {
                    info!(
                        scope = %self.scope,
                        consumed = previous.consumed_units,
                        window_start = %start,
                        "Quota window rolled over"
                    );
                }
                let state = QuotaState::new(self.scope.clone(), start, budget);
                self.store.save(&state).await?;
                Ok(state)
            }
        }
    }

    /// Reserve `units` if they fit in the current window.
    pub async fn reserve(&self, units: u32) -> AppResult<Option<Reservation>> {
        let _guard = self.lock.lock().await;
        let mut state = self.current_state().await?;

        if !state.can_afford(i64::from(units)) {
            debug!(
                units,
                consumed = state.consumed_units,
                budget = state.budget_units,
                "Quota reservation denied"
            );
            return Ok(None);
        }

        state.consumed_units += i64::from(units);
        self.store.save(&state).await?;
        debug!(units, consumed = state.consumed_units, "Quota reserved");
        Ok(Some(Reservation {
            units,
            window_start: state.window_start,
        }))
    }

    /// Return reserved units that were not spent. A reservation from a
    /// window that has since rolled over is dropped.
    pub async fn release(&self, reservation: Reservation) -> AppResult<()> {
        if reservation.units == 0 {
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        let mut state = self.current_state().await?;
        if state.window_start != reservation.window_start {
            debug!(
                units = reservation.units,
                reserved_in = %reservation.window_start,
                "Reservation belongs to an expired window, nothing to release"
            );
            return Ok(());
        }
        state.consumed_units = (state.consumed_units - i64::from(reservation.units)).max(0);
        self.store.save(&state).await?;
        debug!(units = reservation.units, consumed = state.consumed_units, "Quota released");
        Ok(())
    }

    /// Replace a reservation with what the destination actually charged.
    /// Without a reservation the whole charge lands on the current window.
    pub async fn settle(&self, reservation: Option<Reservation>, actual: u32) -> AppResult<()> {
        let reserved = reservation.map_or(0, |r| r.units);
        if actual <= reserved {
            if let Some(reservation) = reservation {
                return self
                    .release(Reservation {
                        units: reserved - actual,
                        ..reservation
                    })
                    .await;
            }
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        let mut state = self.current_state().await?;
        state.consumed_units += i64::from(actual - reserved);
        self.store.save(&state).await?;
        warn!(reserved, actual, "Destination charged more than reserved");
        Ok(())
    }

    /// The destination reported the budget as spent: consume the rest of
    /// the window and return when it ends.
    pub async fn mark_exhausted(&self) -> AppResult<DateTime<Utc>> {
        let _guard = self.lock.lock().await;
        let mut state = self.current_state().await?;
        state.consumed_units = state.consumed_units.max(state.budget_units);
        self.store.save(&state).await?;
        let end = state.window_end(self.window_length());
        warn!(window_end = %end, "Upload quota exhausted by destination");
        Ok(end)
    }

    /// Current window snapshot.
    pub async fn current_window(&self) -> AppResult<QuotaWindow> {
        let _guard = self.lock.lock().await;
        let state = self.current_state().await?;
        Ok(QuotaWindow {
            consumed_units: state.consumed_units,
            budget_units: state.budget_units,
            remaining_units: state.remaining_units(),
            window_start: state.window_start,
            window_end: state.window_end(self.window_length()),
        })
    }
}
