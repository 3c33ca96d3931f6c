//! Content deduplication over the completed-transfer history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use cloudvid_core::result::AppResult;
use cloudvid_core::types::FinalizedUpload;
use cloudvid_database::HistoryStore;
use cloudvid_entity::history::{HistoryRecord, NewHistoryRecord};
use cloudvid_entity::job::Job;

/// Lookup and recording of completed transfers keyed by source checksum.
#[derive(Debug, Clone)]
pub struct HistoryIndex {
    store: Arc<dyn HistoryStore>,
}

impl HistoryIndex {
    /// Create a new index over a history store.
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    /// The completed transfer of this content, if any.
    pub async fn lookup(&self, checksum: &str) -> AppResult<Option<HistoryRecord>> {
        if checksum.is_empty() {
            return Ok(None);
        }
        self.store.lookup(checksum).await
    }

    /// Record a finalized transfer. Called once per job, after the
    /// destination confirmed finalization.
    pub async fn record(
        &self,
        job: &Job,
        upload: &FinalizedUpload,
        uploaded_at: DateTime<Utc>,
    ) -> AppResult<HistoryRecord> {
        let record = self
            .store
            .record(NewHistoryRecord {
                source_checksum: job.source.checksum.clone(),
                source_file_id: job.source.file_id.clone(),
                source_file_name: job.source.display_name.clone(),
                job_id: Some(job.id),
                destination_id: upload.destination_id.clone(),
                destination_url: upload.url.clone(),
                destination_revision_tag: upload.revision_tag.clone(),
                uploaded_at,
            })
            .await?;
        debug!(job_id = %job.id, checksum = %record.source_checksum, "Recorded transfer history");
        Ok(record)
    }

    /// Most recent completed transfers.
    pub async fn recent(&self, limit: u32) -> AppResult<Vec<HistoryRecord>> {
        self.store.list_recent(limit).await
    }
}
