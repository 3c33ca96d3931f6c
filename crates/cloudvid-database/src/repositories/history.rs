//! PostgreSQL completed-transfer history.

use async_trait::async_trait;
use sqlx::PgPool;

use cloudvid_core::result::AppResult;
use cloudvid_entity::history::{HistoryRecord, NewHistoryRecord};

use super::map_db_error;
use crate::store::HistoryStore;

/// History store backed by the `upload_history` table.
#[derive(Debug, Clone)]
pub struct PgHistoryStore {
    pool: PgPool,
}

impl PgHistoryStore {
    /// Create a new history store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn lookup(&self, checksum: &str) -> AppResult<Option<HistoryRecord>> {
        sqlx::query_as::<_, HistoryRecord>(
            "SELECT * FROM upload_history WHERE source_checksum = $1",
        )
        .bind(checksum)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error("Failed to look up history", e))
    }

    async fn record(&self, data: NewHistoryRecord) -> AppResult<HistoryRecord> {
        sqlx::query_as::<_, HistoryRecord>(
            "INSERT INTO upload_history (source_checksum, source_file_id, source_file_name, \
             job_id, destination_id, destination_url, destination_revision_tag, uploaded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (source_checksum) DO UPDATE SET \
             source_file_id = EXCLUDED.source_file_id, \
             source_file_name = EXCLUDED.source_file_name, \
             job_id = EXCLUDED.job_id, \
             destination_id = EXCLUDED.destination_id, \
             destination_url = EXCLUDED.destination_url, \
             destination_revision_tag = EXCLUDED.destination_revision_tag, \
             uploaded_at = EXCLUDED.uploaded_at \
             RETURNING *",
        )
        .bind(&data.source_checksum)
        .bind(&data.source_file_id)
        .bind(&data.source_file_name)
        .bind(data.job_id)
        .bind(&data.destination_id)
        .bind(&data.destination_url)
        .bind(&data.destination_revision_tag)
        .bind(data.uploaded_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_error("Failed to record history", e))
    }

    async fn list_recent(&self, limit: u32) -> AppResult<Vec<HistoryRecord>> {
        sqlx::query_as::<_, HistoryRecord>(
            "SELECT * FROM upload_history ORDER BY uploaded_at DESC, id DESC LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error("Failed to list history", e))
    }
}
