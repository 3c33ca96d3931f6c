//! Injectable time source.

use chrono::{DateTime, Utc};

/// Time source used by the quota tracker and dispatcher so windows and
/// retry delays can be driven deterministically in tests.
pub trait Clock: Send + Sync + std::fmt::Debug + 'static {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// System clock implementation using actual wall time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
