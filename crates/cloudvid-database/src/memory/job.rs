//! In-memory job store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use cloudvid_core::error::AppError;
use cloudvid_core::result::AppResult;
use cloudvid_core::traits::{Clock, SystemClock};
use cloudvid_core::types::{BatchId, JobId};
use cloudvid_entity::job::{Job, JobStatus, JobUpdate, NewJob};

use crate::store::{JobStore, QueueSummary, check_transition};

/// In-memory job store using a Tokio mutex for atomicity.
///
/// The single-active rule is checked under the same lock as the status
/// write, which gives the same guarantee as the partial unique index of the
/// PostgreSQL store.
#[derive(Debug, Clone)]
pub struct MemoryJobStore {
    jobs: Arc<Mutex<HashMap<JobId, Job>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryJobStore {
    /// Create an empty store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store using the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    async fn collect<F>(&self, filter: F) -> Vec<Job>
    where
        F: Fn(&Job) -> bool,
    {
        let jobs = self.jobs.lock().await;
        let mut matched: Vec<Job> = jobs.values().filter(|&job| filter(job)).cloned().collect();
        matched.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        matched
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, data: NewJob) -> AppResult<Job> {
        let job = Job::from_new(data, self.clock.now());
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_by_id(&self, id: JobId) -> AppResult<Option<Job>> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn fetch_next_pending(&self) -> AppResult<Option<Job>> {
        let now = self.clock.now();
        Ok(self
            .collect(|job| job.is_eligible(now))
            .await
            .into_iter()
            .next())
    }

    async fn transition(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        update: JobUpdate,
    ) -> AppResult<Job> {
        let mut jobs = self.jobs.lock().await;

        let current = jobs
            .get(&id)
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;
        check_transition(current, from, to)?;

        if to.is_active() && !from.is_active() {
            if let Some(active) = jobs.values().find(|job| job.status.is_active()) {
                return Err(AppError::conflict(format!(
                    "Job {} is already active",
                    active.id
                )));
            }
        }

        let now = self.clock.now();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;
        job.apply(to, update, now);
        debug!(job_id = %id, from = %from, to = %to, "Job transitioned");
        Ok(job.clone())
    }

    async fn request_cancel(&self, id: JobId) -> AppResult<Job> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;
        if job.status.is_terminal() {
            return Err(AppError::conflict(format!("Job {id} already finished")));
        }
        job.cancel_requested = true;
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn is_cancel_requested(&self, id: JobId) -> AppResult<bool> {
        self.jobs
            .lock()
            .await
            .get(&id)
            .map(|job| job.cancel_requested)
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))
    }

    async fn list_by_owner(&self, owner: &str) -> AppResult<Vec<Job>> {
        Ok(self.collect(|job| job.owner == owner).await)
    }

    async fn list_by_batch(&self, batch_id: BatchId) -> AppResult<Vec<Job>> {
        Ok(self.collect(|job| job.batch_id == Some(batch_id)).await)
    }

    async fn list_by_status(&self, statuses: &[JobStatus]) -> AppResult<Vec<Job>> {
        Ok(self.collect(|job| statuses.contains(&job.status)).await)
    }

    async fn find_open_by_source(&self, owner: &str, file_id: &str) -> AppResult<Option<Job>> {
        Ok(self
            .collect(|job| {
                job.owner == owner && job.source.file_id == file_id && !job.status.is_terminal()
            })
            .await
            .into_iter()
            .next())
    }

    async fn delete(&self, id: JobId) -> AppResult<bool> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get(&id) {
            None => Ok(false),
            Some(job) if job.status.is_active() => Err(AppError::conflict(format!(
                "Job {id} is transferring; cancel it first"
            ))),
            Some(_) => Ok(jobs.remove(&id).is_some()),
        }
    }

    async fn delete_finished(&self, owner: Option<&str>) -> AppResult<u64> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal() && owner.is_none_or(|owner| job.owner == owner))
        });
        Ok((before - jobs.len()) as u64)
    }

    async fn summary(&self, owner: Option<&str>) -> AppResult<QueueSummary> {
        let jobs = self.jobs.lock().await;
        let mut summary = QueueSummary::default();
        for job in jobs
            .values()
            .filter(|job| owner.is_none_or(|owner| job.owner == owner))
        {
            *summary
                .counts
                .entry(job.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(summary)
    }
}
