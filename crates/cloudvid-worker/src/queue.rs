//! Job admission: single and batch enqueue, plus queue management.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use cloudvid_core::error::{AppError, ErrorKind};
use cloudvid_core::result::AppResult;
use cloudvid_core::types::{BatchId, JobId, UploadMetadata};
use cloudvid_database::{JobStore, QueueSummary};
use cloudvid_entity::history::HistoryRecord;
use cloudvid_entity::job::{Job, NewJob, SourceRef};
use cloudvid_transfer::SizePolicy;

use crate::dedup::HistoryIndex;
use crate::dispatcher::DispatcherHandle;

/// Parameters for enqueuing one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    /// Requesting user.
    pub owner: String,
    /// Source file.
    pub source: SourceRef,
    /// Resolved destination metadata.
    pub metadata: UploadMetadata,
    /// Skip content that was already transferred.
    pub skip_duplicates: bool,
    /// Retry budget override.
    pub max_retries: Option<i32>,
}

/// One file of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    /// Source file.
    pub source: SourceRef,
    /// Resolved destination metadata.
    pub metadata: UploadMetadata,
}

/// Parameters for enqueuing several files at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Requesting user.
    pub owner: String,
    /// Files to enqueue, in order.
    pub items: Vec<BatchItem>,
    /// Skip content that was already transferred.
    pub skip_duplicates: bool,
    /// Retry budget override for every job of the batch.
    pub max_retries: Option<i32>,
}

/// Why a file was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The content was already transferred.
    Duplicate,
    /// The owner already has an unfinished job for this file.
    AlreadyInQueue,
    /// Declared size above the hard ceiling.
    FileTooLarge,
    /// Missing or malformed fields.
    Invalid,
}

impl SkipReason {
    /// Stable name of the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::AlreadyInQueue => "already_in_queue",
            Self::FileTooLarge => "file_too_large",
            Self::Invalid => "invalid",
        }
    }
}

/// Result of enqueuing one file.
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    /// A pending job was created.
    Accepted(Job),
    /// The content was already transferred; no job was created.
    Duplicate(HistoryRecord),
    /// The file was not admitted.
    Rejected {
        /// Reason category.
        reason: SkipReason,
        /// Human-readable detail.
        detail: String,
    },
}

/// A file of a batch that did not produce a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    /// Source file identifier.
    pub file_id: String,
    /// Source file name.
    pub display_name: String,
    /// Reason category.
    pub reason: SkipReason,
    /// Human-readable detail.
    pub detail: String,
}

/// Aggregate result of a batch enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Identifier shared by the jobs of the batch.
    pub batch_id: BatchId,
    /// Jobs created.
    pub accepted: u32,
    /// Files skipped because their content was already transferred.
    pub duplicate: u32,
    /// Files rejected for any other reason.
    pub rejected: u32,
    /// Ids of the created jobs, in request order.
    pub job_ids: Vec<JobId>,
    /// Files that did not produce a job.
    pub skipped: Vec<SkippedFile>,
}

/// Admission front of the job store.
#[derive(Debug, Clone)]
pub struct JobQueue {
    /// Durable job storage.
    jobs: Arc<dyn JobStore>,
    /// Completed-transfer index.
    history: HistoryIndex,
    /// Size ceiling and warning threshold.
    size_policy: SizePolicy,
    /// Retry budget when the request has no override.
    default_max_retries: i32,
    /// Wakes the dispatcher after admission or cancellation.
    dispatcher: Option<DispatcherHandle>,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(
        jobs: Arc<dyn JobStore>,
        history: HistoryIndex,
        size_policy: SizePolicy,
        default_max_retries: u32,
    ) -> Self {
        Self {
            jobs,
            history,
            size_policy,
            default_max_retries: i32::try_from(default_max_retries).unwrap_or(i32::MAX),
            dispatcher: None,
        }
    }

    /// Wake this dispatcher whenever work is added or cancelled.
    pub fn with_dispatcher(mut self, handle: DispatcherHandle) -> Self {
        self.dispatcher = Some(handle);
        self
    }

    fn wake(&self) {
        if let Some(handle) = &self.dispatcher {
            handle.wake();
        }
    }

    /// Enqueue one file.
    pub async fn enqueue(&self, request: EnqueueRequest) -> AppResult<EnqueueOutcome> {
        let outcome = self
            .admit(
                &request.owner,
                None,
                request.source,
                request.metadata,
                request.skip_duplicates,
                request.max_retries,
            )
            .await?;
        if matches!(outcome, EnqueueOutcome::Accepted(_)) {
            self.wake();
        }
        Ok(outcome)
    }

    /// Enqueue several files under one batch id.
    pub async fn enqueue_batch(&self, request: BatchRequest) -> AppResult<BatchOutcome> {
        let batch_id = BatchId::new();
        let mut outcome = BatchOutcome {
            batch_id,
            accepted: 0,
            duplicate: 0,
            rejected: 0,
            job_ids: Vec::new(),
            skipped: Vec::new(),
        };

        for item in request.items {
            let file_id = item.source.file_id.clone();
            let display_name = item.source.display_name.clone();
            let admitted = self
                .admit(
                    &request.owner,
                    Some(batch_id),
                    item.source,
                    item.metadata,
                    request.skip_duplicates,
                    request.max_retries,
                )
                .await?;

            match admitted {
                EnqueueOutcome::Accepted(job) => {
                    outcome.accepted += 1;
                    outcome.job_ids.push(job.id);
                }
                EnqueueOutcome::Duplicate(record) => {
                    outcome.duplicate += 1;
                    outcome.skipped.push(SkippedFile {
                        file_id,
                        display_name,
                        reason: SkipReason::Duplicate,
                        detail: format!("Already uploaded as {}", record.destination_url),
                    });
                }
                EnqueueOutcome::Rejected { reason, detail } => {
                    outcome.rejected += 1;
                    outcome.skipped.push(SkippedFile {
                        file_id,
                        display_name,
                        reason,
                        detail,
                    });
                }
            }
        }

        tracing::info!(
            batch_id = %batch_id,
            owner = %request.owner,
            accepted = outcome.accepted,
            duplicate = outcome.duplicate,
            rejected = outcome.rejected,
            "Batch enqueued"
        );

        if outcome.accepted > 0 {
            self.wake();
        }
        Ok(outcome)
    }

    async fn admit(
        &self,
        owner: &str,
        batch_id: Option<BatchId>,
        source: SourceRef,
        metadata: UploadMetadata,
        skip_duplicates: bool,
        max_retries: Option<i32>,
    ) -> AppResult<EnqueueOutcome> {
        if let Some(detail) = invalid_reason(owner, &source, &metadata, max_retries) {
            return Ok(rejected(SkipReason::Invalid, detail));
        }

        let note = match self.size_policy.check(source.size()) {
            Ok(note) => note,
            Err(err) if err.kind == ErrorKind::FileTooLarge => {
                return Ok(rejected(SkipReason::FileTooLarge, err.message));
            }
            Err(err) => return Err(err),
        };

        if skip_duplicates {
            if let Some(record) = self.history.lookup(&source.checksum).await? {
                tracing::debug!(
                    checksum = %source.checksum,
                    destination_id = %record.destination_id,
                    "Skipping already transferred content"
                );
                return Ok(EnqueueOutcome::Duplicate(record));
            }
        }

        if let Some(existing) = self.jobs.find_open_by_source(owner, &source.file_id).await? {
            return Ok(rejected(
                SkipReason::AlreadyInQueue,
                format!("Already queued as job {} ({})", existing.id, existing.status),
            ));
        }

        let job = self
            .jobs
            .create(NewJob {
                owner: owner.to_string(),
                batch_id,
                source,
                metadata,
                max_retries: max_retries.unwrap_or(self.default_max_retries),
                skip_duplicates,
                message: note.map(|note| format!("Queued for upload. {note}")),
            })
            .await?;

        tracing::debug!(
            job_id = %job.id,
            owner = %job.owner,
            file_id = %job.source.file_id,
            "Enqueued transfer job"
        );
        Ok(EnqueueOutcome::Accepted(job))
    }

    /// Request cancellation; the dispatcher retires the job at its next
    /// checkpoint.
    pub async fn cancel(&self, job_id: JobId) -> AppResult<Job> {
        let job = self.jobs.request_cancel(job_id).await?;
        tracing::info!(job_id = %job_id, status = %job.status, "Cancellation requested");
        self.wake();
        Ok(job)
    }

    /// Find a job.
    pub async fn get(&self, job_id: JobId) -> AppResult<Job> {
        self.jobs
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Job {job_id} not found")))
    }

    /// All jobs of an owner with their status and progress.
    pub async fn list_for_owner(&self, owner: &str) -> AppResult<Vec<Job>> {
        self.jobs.list_by_owner(owner).await
    }

    /// All jobs admitted with a batch.
    pub async fn jobs_for_batch(&self, batch_id: BatchId) -> AppResult<Vec<Job>> {
        self.jobs.list_by_batch(batch_id).await
    }

    /// Counts per status.
    pub async fn summary(&self, owner: Option<&str>) -> AppResult<QueueSummary> {
        self.jobs.summary(owner).await
    }

    /// Delete a job that is not transferring.
    pub async fn delete(&self, job_id: JobId) -> AppResult<bool> {
        self.jobs.delete(job_id).await
    }

    /// Delete finished jobs.
    pub async fn clear_finished(&self, owner: Option<&str>) -> AppResult<u64> {
        let removed = self.jobs.delete_finished(owner).await?;
        tracing::info!(removed, owner = owner.unwrap_or("*"), "Cleared finished jobs");
        Ok(removed)
    }
}

fn rejected(reason: SkipReason, detail: impl Into<String>) -> EnqueueOutcome {
    EnqueueOutcome::Rejected {
        reason,
        detail: detail.into(),
    }
}

fn invalid_reason(
    owner: &str,
    source: &SourceRef,
    metadata: &UploadMetadata,
    max_retries: Option<i32>,
) -> Option<String> {
    if owner.trim().is_empty() {
        return Some("Owner is required".into());
    }
    if source.file_id.trim().is_empty() {
        return Some("Source file id is required".into());
    }
    if source.checksum.trim().is_empty() {
        return Some("Source checksum is required".into());
    }
    if source.size_bytes < 0 {
        return Some("Source size must not be negative".into());
    }
    if metadata.title.trim().is_empty() {
        return Some("Title is required".into());
    }
    if max_retries.is_some_and(|n| n < 0) {
        return Some("max_retries must not be negative".into());
    }
    None
}
