//! Single-flight dispatcher: polls the job store and drives one job at a
//! time through admission and the transfer pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, watch};
use tokio::time;

use cloudvid_core::config::WorkerConfig;
use cloudvid_core::error::{AppError, ErrorKind};
use cloudvid_core::result::AppResult;
use cloudvid_core::traits::Clock;
use cloudvid_core::types::{FinalizedUpload, JobId};
use cloudvid_database::JobStore;
use cloudvid_entity::job::{Job, JobStatus, JobUpdate, TransferResult};
use cloudvid_transfer::{
    Checkpoint, Stage, StageProgress, TransferObserver, TransferPipeline, TransferRequest,
};

use crate::dedup::HistoryIndex;
use crate::quota::{QuotaTracker, Reservation};
use crate::retry::{RetryDecision, RetryPolicy};

/// Attempts for a store write that follows a finalized upload.
const STORE_WRITE_ATTEMPTS: u32 = 3;

/// Pause before the second attempt; doubled for each later one.
const STORE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No eligible pending job.
    Idle,
    /// The oldest eligible job is waiting for upload budget.
    Deferred {
        /// The waiting job.
        job_id: JobId,
    },
    /// Another writer moved the job first.
    Lost {
        /// The contended job.
        job_id: JobId,
    },
    /// The job left the active states; `status` is where it landed
    /// (`Pending` when a retry or deferral was scheduled).
    Finished {
        /// The processed job.
        job_id: JobId,
        /// Status after the cycle.
        status: JobStatus,
    },
}

/// Cheap handle that cuts the dispatcher's poll sleep short.
#[derive(Debug, Clone, Default)]
pub struct DispatcherHandle {
    notify: Arc<Notify>,
}

impl DispatcherHandle {
    /// Wake the dispatcher.
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}

/// The single logical worker.
#[derive(Debug)]
pub struct Dispatcher {
    jobs: Arc<dyn JobStore>,
    history: HistoryIndex,
    quota: Arc<QuotaTracker>,
    retry: RetryPolicy,
    pipeline: TransferPipeline,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
    handle: DispatcherHandle,
}

impl Dispatcher {
    /// Create a new dispatcher.
    pub fn new(
        jobs: Arc<dyn JobStore>,
        history: HistoryIndex,
        quota: Arc<QuotaTracker>,
        retry: RetryPolicy,
        pipeline: TransferPipeline,
        clock: Arc<dyn Clock>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            jobs,
            history,
            quota,
            retry,
            pipeline,
            clock,
            config,
            handle: DispatcherHandle::default(),
        }
    }

    /// Handle used to wake this dispatcher.
    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    /// Run until the shutdown signal flips to `true`.
    ///
    /// A shutdown in the middle of a transfer drops it at the current await
    /// point; the job stays active and is recovered on the next start.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let poll_interval = Duration::from_secs(self.config.poll_interval_seconds);
        tracing::info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            "Dispatcher started"
        );

        if self.config.recover_on_start {
            match self.recover().await {
                Ok(0) => {}
                Ok(n) => tracing::warn!(recovered = n, "Recovered interrupted jobs"),
                Err(e) => tracing::error!(error = %e, "Failed to recover interrupted jobs"),
            }
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = tokio::select! {
                _ = shutdown.changed() => break,
                outcome = self.run_once() => outcome,
            };

            let busy = match outcome {
                Ok(CycleOutcome::Finished { .. }) => true,
                Ok(CycleOutcome::Lost { job_id }) => {
                    tracing::debug!(job_id = %job_id, "Job taken by another writer");
                    false
                }
                Ok(CycleOutcome::Idle) => {
                    tracing::trace!("No eligible jobs");
                    false
                }
                Ok(CycleOutcome::Deferred { job_id }) => {
                    tracing::debug!(job_id = %job_id, "Waiting for upload quota");
                    false
                }
                Err(e) => {
                    tracing::error!(error = %e, "Dispatcher cycle failed");
                    false
                }
            };
            if busy {
                continue;
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = self.handle.notify.notified() => {}
                _ = time::sleep(poll_interval) => {}
            }
        }

        tracing::info!("Dispatcher stopped");
    }

    /// Move jobs stranded in an active state by a dead process back to
    /// pending. The retry count is unchanged and the upload session kept.
    pub async fn recover(&self) -> AppResult<usize> {
        let stranded = self
            .jobs
            .list_by_status(&[JobStatus::Downloading, JobStatus::Uploading])
            .await?;

        let mut recovered = 0;
        for job in stranded {
            let update = JobUpdate {
                message: Some(format!("Recovered after interruption during {}", job.status)),
                next_eligible_at: Some(None),
                ..JobUpdate::default()
            };
            match self
                .jobs
                .transition(job.id, job.status, JobStatus::Pending, update)
                .await
            {
                Ok(_) => {
                    tracing::info!(job_id = %job.id, from = %job.status, "Job recovered to pending");
                    recovered += 1;
                }
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(recovered)
    }

    /// Run cycles back to back until one ends without finishing a job.
    ///
    /// Returns every outcome; the last one says why draining stopped.
    pub async fn drain(&self) -> AppResult<Vec<CycleOutcome>> {
        let mut outcomes = Vec::new();
        loop {
            let outcome = self.run_once().await?;
            let done = !matches!(outcome, CycleOutcome::Finished { .. });
            outcomes.push(outcome);
            if done {
                return Ok(outcomes);
            }
        }
    }

    /// Perform exactly one poll cycle.
    pub async fn run_once(&self) -> AppResult<CycleOutcome> {
        let Some(job) = self.jobs.fetch_next_pending().await? else {
            return Ok(CycleOutcome::Idle);
        };
        let job_id = job.id;

        if job.cancel_requested {
            let update = JobUpdate {
                message: Some("Cancelled before transfer started".into()),
                upload_session: Some(None),
                ..JobUpdate::default()
            };
            return self.settle(job_id, JobStatus::Pending, JobStatus::Cancelled, update).await;
        }

        if job.skip_duplicates {
            if let Some(record) = self.history.lookup(&job.source.checksum).await? {
                let update = JobUpdate {
                    progress: Some(100.0),
                    reset_progress: true,
                    message: Some(format!("Skipped: already uploaded as {}", record.destination_url)),
                    result: Some(record.result()),
                    ..JobUpdate::default()
                };
                tracing::info!(
                    job_id = %job_id,
                    checksum = %job.source.checksum,
                    destination_id = %record.destination_id,
                    "Duplicate content, completing without transfer"
                );
                return self.settle(job_id, JobStatus::Pending, JobStatus::Completed, update).await;
            }
        }

        // A job resuming an existing session was charged when the session
        // was created.
        let reservation = if job.upload_session.is_none() {
            match self.quota.reserve(self.quota.upload_cost()).await? {
                Some(reservation) => Some(reservation),
                None => return Ok(CycleOutcome::Deferred { job_id }),
            }
        } else {
            None
        };

        let request = transfer_request(&job);
        // Oversized jobs fail inside the attempt; only the note is needed here.
        let note = self.pipeline.check_size(&request).ok().flatten();
        let observer = JobObserver::new(
            self.jobs.as_ref(),
            job_id,
            self.config.progress_step_percent,
            note,
        );

        let update = JobUpdate::message(observer.annotate(match job.retry_count {
            0 => "Starting transfer".to_string(),
            n => format!("Starting transfer (retry {n}/{})", job.max_retries),
        }));
        let job = match self
            .jobs
            .transition(job_id, JobStatus::Pending, JobStatus::Downloading, update)
            .await
        {
            Ok(job) => job,
            Err(e) => {
                self.release(job_id, reservation).await;
                if e.is_conflict() {
                    tracing::debug!(job_id = %job_id, error = %e, "Lost dispatch race");
                    return Ok(CycleOutcome::Lost { job_id });
                }
                return Err(e);
            }
        };
        tracing::info!(
            job_id = %job_id,
            file_id = %job.source.file_id,
            size = job.source.size_bytes,
            "Job started"
        );

        match self.transfer(&job, &request, &observer).await {
            Ok(finalized) => self.complete(&job, finalized, reservation, &observer).await,
            Err(error) => {
                if !observer.session_created() {
                    self.release(job_id, reservation).await;
                }
                self.fail(job_id, error).await
            }
        }
    }

    async fn transfer(
        &self,
        job: &Job,
        request: &TransferRequest,
        observer: &JobObserver<'_>,
    ) -> AppResult<FinalizedUpload> {
        self.pipeline.check_size(request)?;
        self.pipeline.download(request, observer).await?;

        self.jobs
            .transition(
                job.id,
                JobStatus::Downloading,
                JobStatus::Uploading,
                JobUpdate::message(observer.annotate("Uploading to destination")),
            )
            .await?;
        tracing::info!(job_id = %job.id, "Download complete, uploading");

        let handle = self.pipeline.open_session(request, observer).await?;
        self.pipeline.upload(request, &handle, observer).await
    }

    /// Return an unused reservation. The attempt goes on regardless of the
    /// outcome.
    async fn release(&self, job_id: JobId, reservation: Option<Reservation>) {
        let Some(reservation) = reservation else {
            return;
        };
        if let Err(e) = self.quota.release(reservation).await {
            tracing::warn!(
                job_id = %job_id,
                units = reservation.units,
                error = %e,
                "Failed to release quota reservation"
            );
        }
    }

    /// Record a finalized upload and complete the job.
    ///
    /// The destination already holds the video, so nothing here sends the
    /// job back through the pipeline. Store writes are retried in place; a
    /// history write that keeps failing is noted on the completed job.
    async fn complete(
        &self,
        job: &Job,
        finalized: FinalizedUpload,
        reservation: Option<Reservation>,
        observer: &JobObserver<'_>,
    ) -> AppResult<CycleOutcome> {
        if let Some(actual) = finalized.units_consumed {
            if let Err(e) = self.quota.settle(reservation, actual).await {
                tracing::warn!(job_id = %job.id, actual, error = %e, "Failed to settle quota");
            }
        }

        let now = self.clock.now();
        let mut message = format!("Uploaded: {}", finalized.url);
        if let Err(e) = with_attempts(|| self.history.record(job, &finalized, now)).await {
            tracing::error!(
                job_id = %job.id,
                checksum = %job.source.checksum,
                error = %e,
                "Failed to record transfer history"
            );
            message.push_str(&format!(" (not recorded in history: {})", e.message));
        }

        let update = JobUpdate {
            progress: Some(100.0),
            message: Some(observer.annotate(message)),
            result: Some(TransferResult {
                destination_id: finalized.destination_id.clone(),
                url: finalized.url.clone(),
            }),
            upload_session: Some(None),
            ..JobUpdate::default()
        };
        let outcome = with_attempts(|| {
            self.settle(job.id, JobStatus::Uploading, JobStatus::Completed, update.clone())
        })
        .await?;
        tracing::info!(
            job_id = %job.id,
            destination_id = %finalized.destination_id,
            url = %finalized.url,
            "Job completed"
        );
        Ok(outcome)
    }

    async fn fail(&self, job_id: JobId, error: AppError) -> AppResult<CycleOutcome> {
        let Some(current) = self.jobs.find_by_id(job_id).await? else {
            return Ok(CycleOutcome::Lost { job_id });
        };
        if !current.status.is_active() {
            return Ok(CycleOutcome::Lost { job_id });
        }
        let from = current.status;
        let now = self.clock.now();

        match self.retry.decide(&current, &error, now) {
            RetryDecision::Retry {
                retry_count,
                eligible_at,
            } => {
                tracing::warn!(
                    job_id = %job_id,
                    retry = retry_count,
                    max_retries = current.max_retries,
                    eligible_at = %eligible_at,
                    error = %error,
                    "Transfer failed, retry scheduled"
                );
                let update = JobUpdate {
                    progress: Some(0.0),
                    reset_progress: true,
                    message: Some(retry_message(&error, retry_count, current.max_retries, eligible_at)),
                    error: Some((error.kind.as_str().to_string(), error.message.clone())),
                    retry_count: Some(retry_count),
                    next_eligible_at: Some(Some(eligible_at)),
                    ..JobUpdate::default()
                };
                self.settle(job_id, from, JobStatus::Pending, update).await
            }
            RetryDecision::Defer => {
                let until = self.quota.mark_exhausted().await?;
                tracing::warn!(job_id = %job_id, until = %until, "Upload quota exhausted, job deferred");
                let update = JobUpdate {
                    progress: Some(0.0),
                    reset_progress: true,
                    message: Some(format!(
                        "Upload quota exhausted; waiting until {}",
                        until.to_rfc3339()
                    )),
                    next_eligible_at: Some(Some(until)),
                    ..JobUpdate::default()
                };
                self.settle(job_id, from, JobStatus::Pending, update).await
            }
            RetryDecision::Fail => {
                tracing::error!(
                    job_id = %job_id,
                    kind = %error.kind,
                    retry_count = current.retry_count,
                    error = %error.message,
                    "Job failed"
                );
                let update = JobUpdate {
                    message: Some(format!("Failed: {}", error.message)),
                    error: Some((error.kind.as_str().to_string(), error.message.clone())),
                    upload_session: Some(None),
                    ..JobUpdate::default()
                };
                self.settle(job_id, from, JobStatus::Failed, update).await
            }
            RetryDecision::Cancel => {
                tracing::info!(job_id = %job_id, from = %from, "Job cancelled");
                let update = JobUpdate {
                    message: Some("Cancelled".into()),
                    upload_session: Some(None),
                    ..JobUpdate::default()
                };
                self.settle(job_id, from, JobStatus::Cancelled, update).await
            }
            RetryDecision::Abandon => {
                tracing::debug!(job_id = %job_id, error = %error, "Job moved by another writer");
                Ok(CycleOutcome::Lost { job_id })
            }
        }
    }

    /// Final transition of a cycle; removes the spool once the job is
    /// terminal.
    async fn settle(
        &self,
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
        update: JobUpdate,
    ) -> AppResult<CycleOutcome> {
        match self.jobs.transition(job_id, from, to, update).await {
            Ok(job) => {
                if job.status.is_terminal() {
                    if let Err(e) = self.pipeline.spool().remove(job_id).await {
                        tracing::warn!(job_id = %job_id, error = %e, "Failed to remove spool file");
                    }
                }
                Ok(CycleOutcome::Finished {
                    job_id,
                    status: job.status,
                })
            }
            Err(e) if e.is_conflict() => Ok(CycleOutcome::Lost { job_id }),
            Err(e) => Err(e),
        }
    }
}

fn transfer_request(job: &Job) -> TransferRequest {
    TransferRequest {
        job_id: job.id,
        file_id: job.source.file_id.clone(),
        checksum: job.source.checksum.clone(),
        total_size: job.source.size(),
        metadata: job.metadata.clone(),
        upload_session: job.upload_session.clone(),
    }
}

/// Run a store write up to [`STORE_WRITE_ATTEMPTS`] times. Conflicts are
/// returned at once.
async fn with_attempts<T, F, Fut>(mut write: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = AppResult<T>>,
{
    let mut delay = STORE_RETRY_DELAY;
    let mut attempt = 1;
    loop {
        match write().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_conflict() || attempt >= STORE_WRITE_ATTEMPTS => return Err(e),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Store write failed, retrying");
                time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

fn retry_message(error: &AppError, retry: i32, max: i32, at: DateTime<Utc>) -> String {
    let prefix = if error.kind == ErrorKind::AuthExpired {
        "Credentials expired, refresh them before the next attempt. "
    } else {
        ""
    };
    format!(
        "{prefix}Retry {retry}/{max} scheduled at {}: {}",
        at.to_rfc3339(),
        error.message
    )
}

/// Persists pipeline progress for one job and relays cancellation.
struct JobObserver<'a> {
    jobs: &'a dyn JobStore,
    job_id: JobId,
    step: f64,
    last: std::sync::Mutex<Option<(Stage, f64)>>,
    session_created: AtomicBool,
    /// Size warning carried on every message of the attempt.
    note: Option<String>,
}

impl<'a> JobObserver<'a> {
    fn new(jobs: &'a dyn JobStore, job_id: JobId, step: f64, note: Option<String>) -> Self {
        Self {
            jobs,
            job_id,
            step,
            last: std::sync::Mutex::new(None),
            session_created: AtomicBool::new(false),
            note,
        }
    }

    fn annotate(&self, message: impl Into<String>) -> String {
        let message = message.into();
        match &self.note {
            Some(note) => format!("{message}. {note}"),
            None => message,
        }
    }

    fn session_created(&self) -> bool {
        self.session_created.load(Ordering::SeqCst)
    }

    /// Whether this report is worth a write.
    fn should_persist(&self, progress: &StageProgress) -> bool {
        let percent = progress.percent();
        let leg_done = match progress.stage {
            Stage::Download => progress.downloaded >= progress.total,
            Stage::Upload => progress.uploaded >= progress.total,
        };
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let due = match *last {
            Some((stage, at)) => stage != progress.stage || leg_done || percent - at >= self.step,
            None => true,
        };
        if due {
            *last = Some((progress.stage, percent));
        }
        due
    }
}

#[async_trait]
impl TransferObserver for JobObserver<'_> {
    async fn on_progress(&self, progress: StageProgress) -> AppResult<Checkpoint> {
        if self.jobs.is_cancel_requested(self.job_id).await? {
            return Ok(Checkpoint::Cancel);
        }
        if self.should_persist(&progress) {
            let status = match progress.stage {
                Stage::Download => JobStatus::Downloading,
                Stage::Upload => JobStatus::Uploading,
            };
            self.jobs
                .transition(
                    self.job_id,
                    status,
                    status,
                    JobUpdate::progress(progress.percent(), self.annotate(progress.message())),
                )
                .await?;
        }
        Ok(Checkpoint::Continue)
    }

    async fn on_session_created(&self, handle: &str) -> AppResult<()> {
        self.session_created.store(true, Ordering::SeqCst);
        self.jobs
            .transition(
                self.job_id,
                JobStatus::Uploading,
                JobStatus::Uploading,
                JobUpdate {
                    message: Some(self.annotate("Upload session created")),
                    upload_session: Some(Some(handle.to_string())),
                    ..JobUpdate::default()
                },
            )
            .await?;
        Ok(())
    }
}
