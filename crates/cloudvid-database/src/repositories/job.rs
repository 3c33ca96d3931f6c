//! PostgreSQL job store.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;

use cloudvid_core::error::AppError;
use cloudvid_core::result::AppResult;
use cloudvid_core::traits::{Clock, SystemClock};
use cloudvid_core::types::{BatchId, JobId};
use cloudvid_entity::job::{Job, JobStatus, JobUpdate, NewJob};

use super::map_db_error;
use crate::store::{JobStore, QueueSummary, check_transition};

/// Job store backed by the `jobs` table.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgJobStore {
    /// Create a new job store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn exists(&self, id: JobId) -> AppResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM jobs WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error("Failed to check job", e))
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, data: NewJob) -> AppResult<Job> {
        let job = Job::from_new(data, self.clock.now());

        sqlx::query_as::<_, Job>(
            "INSERT INTO jobs (id, owner, batch_id, source_file_id, source_checksum, display_name, \
             size_bytes, mime_type, metadata, status, progress, message, retry_count, max_retries, \
             skip_duplicates, cancel_requested, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
             RETURNING *",
        )
        .bind(job.id)
        .bind(&job.owner)
        .bind(job.batch_id)
        .bind(&job.source.file_id)
        .bind(&job.source.checksum)
        .bind(&job.source.display_name)
        .bind(job.source.size_bytes)
        .bind(&job.source.mime_type)
        .bind(Json(&job.metadata))
        .bind(job.status)
        .bind(job.progress)
        .bind(&job.message)
        .bind(job.retry_count)
        .bind(job.max_retries)
        .bind(job.skip_duplicates)
        .bind(job.cancel_requested)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_error("Failed to create job", e))
    }

    async fn find_by_id(&self, id: JobId) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error("Failed to find job", e))
    }

    async fn fetch_next_pending(&self) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs \
             WHERE status = 'pending' \
             AND (cancel_requested OR next_eligible_at IS NULL OR next_eligible_at <= $1) \
             ORDER BY created_at ASC, id ASC \
             LIMIT 1",
        )
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error("Failed to fetch next pending job", e))
    }

    async fn transition(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        update: JobUpdate,
    ) -> AppResult<Job> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_error("Failed to begin transaction", e))?;

        let mut job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_db_error("Failed to lock job", e))?
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;

        check_transition(&job, from, to)?;
        job.apply(to, update, self.clock.now());

        let updated = sqlx::query_as::<_, Job>(
            "UPDATE jobs SET status = $2, progress = $3, message = $4, destination_id = $5, \
             destination_url = $6, error_kind = $7, error = $8, retry_count = $9, \
             next_eligible_at = $10, upload_session = $11, started_at = $12, \
             completed_at = $13, updated_at = $14 \
             WHERE id = $1 RETURNING *",
        )
        .bind(job.id)
        .bind(job.status)
        .bind(job.progress)
        .bind(&job.message)
        .bind(&job.destination_id)
        .bind(&job.destination_url)
        .bind(&job.error_kind)
        .bind(&job.error)
        .bind(job.retry_count)
        .bind(job.next_eligible_at)
        .bind(&job.upload_session)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_db_error("Failed to transition job", e))?;

        tx.commit()
            .await
            .map_err(|e| map_db_error("Failed to commit transition", e))?;

        Ok(updated)
    }

    async fn request_cancel(&self, id: JobId) -> AppResult<Job> {
        let job = sqlx::query_as::<_, Job>(
            "UPDATE jobs SET cancel_requested = TRUE, updated_at = $2 \
             WHERE id = $1 AND status NOT IN ('completed', 'failed', 'cancelled') \
             RETURNING *",
        )
        .bind(id)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error("Failed to request cancellation", e))?;

        match job {
            Some(job) => Ok(job),
            None if self.exists(id).await? => Err(AppError::conflict(format!(
                "Job {id} already finished"
            ))),
            None => Err(AppError::not_found(format!("Job {id} not found"))),
        }
    }

    async fn is_cancel_requested(&self, id: JobId) -> AppResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT cancel_requested FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error("Failed to read cancellation flag", e))?
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))
    }

    async fn list_by_owner(&self, owner: &str) -> AppResult<Vec<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE owner = $1 ORDER BY created_at, id")
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_error("Failed to list jobs by owner", e))
    }

    async fn list_by_batch(&self, batch_id: BatchId) -> AppResult<Vec<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE batch_id = $1 ORDER BY created_at, id")
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_error("Failed to list jobs by batch", e))
    }

    async fn list_by_status(&self, statuses: &[JobStatus]) -> AppResult<Vec<Job>> {
        let names: Vec<&str> = statuses.iter().map(JobStatus::as_str).collect();
        sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE status::text = ANY($1) ORDER BY created_at, id",
        )
        .bind(names)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error("Failed to list jobs by status", e))
    }

    async fn find_open_by_source(&self, owner: &str, file_id: &str) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE owner = $1 AND source_file_id = $2 \
             AND status IN ('pending', 'downloading', 'uploading') \
             ORDER BY created_at LIMIT 1",
        )
        .bind(owner)
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error("Failed to find queued job for source", e))
    }

    async fn delete(&self, id: JobId) -> AppResult<bool> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE id = $1 AND status NOT IN ('downloading', 'uploading')",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_error("Failed to delete job", e))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.exists(id).await? {
            return Err(AppError::conflict(format!(
                "Job {id} is transferring; cancel it first"
            )));
        }
        Ok(false)
    }

    async fn delete_finished(&self, owner: Option<&str>) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('completed', 'failed', 'cancelled') \
             AND ($1::text IS NULL OR owner = $1)",
        )
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_error("Failed to clear finished jobs", e))?;
        Ok(result.rows_affected())
    }

    async fn summary(&self, owner: Option<&str>) -> AppResult<QueueSummary> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status::text, COUNT(*) FROM jobs \
             WHERE ($1::text IS NULL OR owner = $1) GROUP BY status",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error("Failed to count jobs", e))?;

        Ok(QueueSummary {
            counts: rows.into_iter().collect(),
        })
    }
}
