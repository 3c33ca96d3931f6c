//! Persistence contracts for jobs, history and the upload budget.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cloudvid_core::result::AppResult;
use cloudvid_core::types::{BatchId, JobId};
use cloudvid_entity::history::{HistoryRecord, NewHistoryRecord};
use cloudvid_entity::job::{Job, JobStatus, JobUpdate, NewJob};
use cloudvid_entity::quota::QuotaState;

/// Durable repository of transfer jobs; the single source of truth for the
/// queue.
///
/// Every mutation is atomic on a single record. Implementations must
/// guarantee that at most one job is in an active status at a time: a
/// `Pending -> Downloading` transition while another job is active fails
/// with `ErrorKind::Conflict`.
#[async_trait]
pub trait JobStore: Send + Sync + std::fmt::Debug + 'static {
    /// Insert a new pending job.
    async fn create(&self, data: NewJob) -> AppResult<Job>;

    /// Find a job by id.
    async fn find_by_id(&self, id: JobId) -> AppResult<Option<Job>>;

    /// Oldest eligible pending job by creation time.
    ///
    /// Jobs whose retry delay has not elapsed are skipped, except when
    /// cancellation was requested for them.
    async fn fetch_next_pending(&self) -> AppResult<Option<Job>>;

    /// Atomic compare-and-set status transition.
    ///
    /// Fails with `Conflict` when the current status is not `from`, with
    /// `Validation` when `from -> to` is not an edge of the state graph,
    /// and with `NotFound` when the job does not exist.
    async fn transition(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        update: JobUpdate,
    ) -> AppResult<Job>;

    /// Raise the cancellation flag without touching the status.
    async fn request_cancel(&self, id: JobId) -> AppResult<Job>;

    /// Read the cancellation flag.
    async fn is_cancel_requested(&self, id: JobId) -> AppResult<bool>;

    /// All jobs of an owner, oldest first.
    async fn list_by_owner(&self, owner: &str) -> AppResult<Vec<Job>>;

    /// All jobs admitted in a batch, oldest first.
    async fn list_by_batch(&self, batch_id: BatchId) -> AppResult<Vec<Job>>;

    /// All jobs in any of the given statuses, oldest first.
    async fn list_by_status(&self, statuses: &[JobStatus]) -> AppResult<Vec<Job>>;

    /// A non-terminal job of `owner` for the same source file, if any.
    async fn find_open_by_source(&self, owner: &str, file_id: &str) -> AppResult<Option<Job>>;

    /// Delete a job. Fails with `Conflict` while it is active.
    async fn delete(&self, id: JobId) -> AppResult<bool>;

    /// Delete terminal jobs, optionally for one owner only.
    async fn delete_finished(&self, owner: Option<&str>) -> AppResult<u64>;

    /// Count jobs per status, optionally for one owner only.
    async fn summary(&self, owner: Option<&str>) -> AppResult<QueueSummary>;
}

/// Durable record of completed transfers keyed by content checksum.
#[async_trait]
pub trait HistoryStore: Send + Sync + std::fmt::Debug + 'static {
    /// Find the record for a checksum.
    async fn lookup(&self, checksum: &str) -> AppResult<Option<HistoryRecord>>;

    /// Insert the record for a checksum, replacing an older one.
    async fn record(&self, data: NewHistoryRecord) -> AppResult<HistoryRecord>;

    /// Most recent records first.
    async fn list_recent(&self, limit: u32) -> AppResult<Vec<HistoryRecord>>;
}

/// Durable upload budget state.
#[async_trait]
pub trait QuotaStore: Send + Sync + std::fmt::Debug + 'static {
    /// Load the state of a scope.
    async fn load(&self, scope: &str) -> AppResult<Option<QuotaState>>;

    /// Persist the state of a scope.
    async fn save(&self, state: &QuotaState) -> AppResult<()>;
}

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    /// Count for each status that has at least one job.
    pub counts: BTreeMap<String, i64>,
}

impl QueueSummary {
    /// Count for one status.
    pub fn count(&self, status: JobStatus) -> i64 {
        self.counts.get(status.as_str()).copied().unwrap_or(0)
    }

    /// Total number of jobs.
    pub fn total(&self) -> i64 {
        self.counts.values().sum()
    }

    /// Jobs currently downloading or uploading.
    pub fn active(&self) -> i64 {
        self.count(JobStatus::Downloading) + self.count(JobStatus::Uploading)
    }
}

/// Shared pre-checks for `transition`.
pub(crate) fn check_transition(
    job: &Job,
    from: JobStatus,
    to: JobStatus,
) -> AppResult<()> {
    use cloudvid_core::error::AppError;

    if job.status != from {
        return Err(AppError::conflict(format!(
            "Job {} is {}, expected {}",
            job.id, job.status, from
        )));
    }
    if !from.can_transition_to(to) {
        return Err(AppError::validation(format!(
            "Illegal transition {from} -> {to} for job {}",
            job.id
        )));
    }
    Ok(())
}
