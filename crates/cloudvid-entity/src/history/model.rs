//! Completed-transfer history record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use cloudvid_core::types::JobId;

use crate::job::TransferResult;

/// One record per successfully completed transfer, keyed by checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct HistoryRecord {
    /// Row identifier.
    pub id: i64,
    /// Content checksum of the source (dedup key).
    pub source_checksum: String,
    /// Source file identifier.
    pub source_file_id: String,
    /// Source file name at upload time.
    pub source_file_name: String,
    /// Job that produced the record.
    pub job_id: Option<JobId>,
    /// Destination identifier.
    pub destination_id: String,
    /// Destination URL.
    pub destination_url: String,
    /// Destination revision tag, for later change detection.
    pub destination_revision_tag: String,
    /// When the destination confirmed finalization.
    pub uploaded_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// The result a duplicate job inherits.
    pub fn result(&self) -> TransferResult {
        TransferResult {
            destination_id: self.destination_id.clone(),
            url: self.destination_url.clone(),
        }
    }
}

/// Data required to record a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewHistoryRecord {
    /// Content checksum of the source.
    pub source_checksum: String,
    /// Source file identifier.
    pub source_file_id: String,
    /// Source file name.
    pub source_file_name: String,
    /// Job that produced the record.
    pub job_id: Option<JobId>,
    /// Destination identifier.
    pub destination_id: String,
    /// Destination URL.
    pub destination_url: String,
    /// Destination revision tag.
    pub destination_revision_tag: String,
    /// Finalization time.
    pub uploaded_at: DateTime<Utc>,
}
