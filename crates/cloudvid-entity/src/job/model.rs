//! Transfer job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use cloudvid_core::types::{BatchId, JobId, UploadMetadata};

use super::status::JobStatus;

/// The source file a job transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SourceRef {
    /// Provider-specific file identifier.
    #[sqlx(rename = "source_file_id")]
    pub file_id: String,
    /// Content checksum (hex); the deduplication key.
    #[sqlx(rename = "source_checksum")]
    pub checksum: String,
    /// Human-readable file name.
    pub display_name: String,
    /// Declared size in bytes.
    pub size_bytes: i64,
    /// MIME type, when known.
    pub mime_type: Option<String>,
}

impl SourceRef {
    /// Declared size as an unsigned byte count.
    pub fn size(&self) -> u64 {
        self.size_bytes.max(0) as u64
    }
}

/// Where a completed transfer landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    /// Destination identifier.
    pub destination_id: String,
    /// Destination URL.
    pub url: String,
}

/// A transfer job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,
    /// Requesting user.
    pub owner: String,
    /// Batch this job was admitted with, if any.
    pub batch_id: Option<BatchId>,
    /// Source file reference.
    #[sqlx(flatten)]
    pub source: SourceRef,
    /// Destination metadata.
    #[sqlx(json)]
    pub metadata: UploadMetadata,
    /// Current status.
    pub status: JobStatus,
    /// Progress percentage in `[0.0, 100.0]`.
    pub progress: f64,
    /// Last human-readable status detail.
    pub message: String,
    /// Destination identifier, set on completion.
    pub destination_id: Option<String>,
    /// Destination URL, set on completion.
    pub destination_url: Option<String>,
    /// Stable machine-readable kind of the last failure.
    pub error_kind: Option<String>,
    /// Human-readable detail of the last failure.
    pub error: Option<String>,
    /// Retries consumed so far.
    pub retry_count: i32,
    /// Retry budget.
    pub max_retries: i32,
    /// Short-circuit to completed when the checksum was already transferred.
    pub skip_duplicates: bool,
    /// Cancellation was requested; observed by the dispatcher.
    pub cancel_requested: bool,
    /// The job is not dispatched before this instant.
    pub next_eligible_at: Option<DateTime<Utc>>,
    /// Resumable upload session handle from a previous attempt.
    pub upload_session: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the current attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a pending job from creation data.
    pub fn from_new(data: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            owner: data.owner,
            batch_id: data.batch_id,
            source: data.source,
            metadata: data.metadata,
            status: JobStatus::Pending,
            progress: 0.0,
            message: data.message.unwrap_or_else(|| "Queued for upload".to_string()),
            destination_id: None,
            destination_url: None,
            error_kind: None,
            error: None,
            retry_count: 0,
            max_retries: data.max_retries,
            skip_duplicates: data.skip_duplicates,
            cancel_requested: false,
            next_eligible_at: None,
            upload_session: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Destination result, present only once completed.
    pub fn result(&self) -> Option<TransferResult> {
        match (&self.destination_id, &self.destination_url) {
            (Some(id), Some(url)) => Some(TransferResult {
                destination_id: id.clone(),
                url: url.clone(),
            }),
            _ => None,
        }
    }

    /// Whether another retry fits in the budget.
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Whether the dispatcher may pick the job up at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && (self.cancel_requested || self.next_eligible_at.is_none_or(|at| at <= now))
    }

    /// Apply a transition in memory.
    ///
    /// The caller has already validated the edge. Progress never decreases
    /// unless the update restarts the attempt.
    pub fn apply(&mut self, to: JobStatus, update: JobUpdate, now: DateTime<Utc>) {
        let from = self.status;
        self.status = to;

        if update.reset_progress {
            self.progress = update.progress.unwrap_or(0.0).clamp(0.0, 100.0);
        } else if let Some(progress) = update.progress {
            self.progress = self.progress.max(progress.clamp(0.0, 100.0));
        }
        if let Some(message) = update.message {
            self.message = message;
        }
        if let Some(result) = update.result {
            self.destination_id = Some(result.destination_id);
            self.destination_url = Some(result.url);
        }
        if let Some((kind, detail)) = update.error {
            self.error_kind = Some(kind);
            self.error = Some(detail);
        }
        if let Some(retry_count) = update.retry_count {
            self.retry_count = retry_count;
        }
        if let Some(next) = update.next_eligible_at {
            self.next_eligible_at = next;
        }
        if let Some(session) = update.upload_session {
            self.upload_session = session;
        }

        if from == JobStatus::Pending && to == JobStatus::Downloading {
            self.started_at = Some(now);
            self.next_eligible_at = None;
        }
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        self.updated_at = now;
    }
}

/// Fields a transition may change besides the status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    /// Proposed progress.
    pub progress: Option<f64>,
    /// Replace progress instead of keeping the maximum (attempt restart).
    pub reset_progress: bool,
    /// New status message.
    pub message: Option<String>,
    /// Destination result.
    pub result: Option<TransferResult>,
    /// Failure `(kind, detail)`.
    pub error: Option<(String, String)>,
    /// New retry count.
    pub retry_count: Option<i32>,
    /// New eligibility instant (`Some(None)` clears it).
    pub next_eligible_at: Option<Option<DateTime<Utc>>>,
    /// New upload session handle (`Some(None)` clears it).
    pub upload_session: Option<Option<String>>,
}

impl JobUpdate {
    /// An update carrying only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// An update carrying progress and a message.
    pub fn progress(progress: f64, message: impl Into<String>) -> Self {
        Self {
            progress: Some(progress),
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Data required to create a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Requesting user.
    pub owner: String,
    /// Batch identifier.
    pub batch_id: Option<BatchId>,
    /// Source file reference.
    pub source: SourceRef,
    /// Destination metadata.
    pub metadata: UploadMetadata,
    /// Retry budget.
    pub max_retries: i32,
    /// Duplicate short-circuit flag.
    pub skip_duplicates: bool,
    /// Initial message (defaults to "Queued for upload").
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job() -> Job {
        Job::from_new(
            NewJob {
                owner: "alice".into(),
                batch_id: None,
                source: SourceRef {
                    file_id: "f1".into(),
                    checksum: "abc".into(),
                    display_name: "clip.mp4".into(),
                    size_bytes: 1000,
                    mime_type: Some("video/mp4".into()),
                },
                metadata: UploadMetadata {
                    title: "clip".into(),
                    ..UploadMetadata::default()
                },
                max_retries: 3,
                skip_duplicates: true,
                message: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_progress_never_decreases_within_attempt() {
        let mut job = new_job();
        let now = Utc::now();
        job.apply(JobStatus::Downloading, JobUpdate::progress(40.0, "a"), now);
        job.apply(JobStatus::Downloading, JobUpdate::progress(10.0, "b"), now);
        assert_eq!(job.progress, 40.0);
        assert_eq!(job.message, "b");
    }

    #[test]
    fn test_reset_progress_on_retry() {
        let mut job = new_job();
        let now = Utc::now();
        job.apply(JobStatus::Downloading, JobUpdate::progress(40.0, "a"), now);
        job.apply(
            JobStatus::Pending,
            JobUpdate {
                reset_progress: true,
                retry_count: Some(1),
                ..JobUpdate::default()
            },
            now,
        );
        assert_eq!(job.progress, 0.0);
        assert_eq!(job.retry_count, 1);
    }

    #[test]
    fn test_timestamps() {
        let mut job = new_job();
        let now = Utc::now();
        job.apply(JobStatus::Downloading, JobUpdate::default(), now);
        assert_eq!(job.started_at, Some(now));
        assert!(job.completed_at.is_none());
        job.apply(JobStatus::Cancelled, JobUpdate::default(), now);
        assert_eq!(job.completed_at, Some(now));
    }

    #[test]
    fn test_eligibility_respects_delay_unless_cancelled() {
        let mut job = new_job();
        let now = Utc::now();
        job.next_eligible_at = Some(now + chrono::Duration::minutes(5));
        assert!(!job.is_eligible(now));
        job.cancel_requested = true;
        assert!(job.is_eligible(now));
    }
}
