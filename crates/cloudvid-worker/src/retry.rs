//! Failure classification and exponential backoff.

use std::time::Duration;

use chrono::{DateTime, Utc};

use cloudvid_core::config::RetryConfig;
use cloudvid_core::error::{AppError, ErrorKind};
use cloudvid_entity::job::Job;

/// How a pipeline failure affects the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network, 5xx or rate limit: retried with backoff.
    Transient,
    /// Credentials expired: retried within the same budget, surfaced in the
    /// message so someone refreshes them.
    AuthExpired,
    /// Daily budget exhausted: not a job failure.
    QuotaExceeded,
    /// Retrying cannot help.
    Permanent,
    /// Cooperative cancellation.
    Cancelled,
    /// Another writer moved the job; abandon the cycle.
    Conflict,
}

impl FailureClass {
    /// Classify an error purely by its kind.
    pub fn of(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::RateLimit
            | ErrorKind::Timeout
            | ErrorKind::ExternalService
            | ErrorKind::ServiceUnavailable
            | ErrorKind::Storage
            | ErrorKind::Database => Self::Transient,
            ErrorKind::AuthExpired => Self::AuthExpired,
            ErrorKind::QuotaExceeded => Self::QuotaExceeded,
            ErrorKind::Cancelled => Self::Cancelled,
            ErrorKind::Conflict => Self::Conflict,
            ErrorKind::ChecksumMismatch
            | ErrorKind::SourceMissing
            | ErrorKind::InvalidMetadata
            | ErrorKind::FileTooLarge
            | ErrorKind::NotFound
            | ErrorKind::Validation
            | ErrorKind::Configuration
            | ErrorKind::Serialization
            | ErrorKind::Internal => Self::Permanent,
        }
    }
}

/// What the dispatcher does with a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to pending with an incremented retry count.
    Retry {
        /// Retry count after this failure.
        retry_count: i32,
        /// Earliest time the job is dispatched again.
        eligible_at: DateTime<Utc>,
    },
    /// Back to pending until the quota window ends; no retry consumed.
    Defer,
    /// Terminal failure.
    Fail,
    /// Terminal cancellation.
    Cancel,
    /// Leave the job alone.
    Abandon,
}

/// Exponential backoff policy: `min(base * multiplier^retry_count, cap)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    base: Duration,
    multiplier: f64,
    cap: Duration,
}

impl RetryPolicy {
    /// Create a new policy.
    pub fn new(base: Duration, multiplier: f64, cap: Duration) -> Self {
        Self {
            base,
            multiplier,
            cap,
        }
    }

    /// Create a policy from configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_secs(config.base_delay_seconds),
            config.multiplier,
            Duration::from_secs(config.max_delay_seconds),
        )
    }

    /// Delay before the retry that follows `retry_count` earlier retries.
    pub fn delay(&self, retry_count: i32) -> Duration {
        let factor = self.multiplier.powi(retry_count.max(0));
        let secs = self.base.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.cap.as_secs_f64() {
            return self.cap;
        }
        Duration::from_secs_f64(secs)
    }

    /// Decide the fate of `job` after `error`.
    pub fn decide(&self, job: &Job, error: &AppError, now: DateTime<Utc>) -> RetryDecision {
        match FailureClass::of(error.kind) {
            FailureClass::Transient | FailureClass::AuthExpired => {
                if !job.has_retry_budget() {
                    return RetryDecision::Fail;
                }
                let delay = chrono::Duration::from_std(self.delay(job.retry_count))
                    .unwrap_or(chrono::Duration::MAX);
                RetryDecision::Retry {
                    retry_count: job.retry_count + 1,
                    eligible_at: now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC),
                }
            }
            FailureClass::QuotaExceeded => RetryDecision::Defer,
            FailureClass::Permanent => RetryDecision::Fail,
            FailureClass::Cancelled => RetryDecision::Cancel,
            FailureClass::Conflict => RetryDecision::Abandon,
        }
    }
}
