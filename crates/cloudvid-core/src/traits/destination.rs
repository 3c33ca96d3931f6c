//! Destination provider capability: resumable upload sessions.

use async_trait::async_trait;
use bytes::Bytes;

use crate::result::AppResult;
use crate::types::{ChunkAck, FinalizedUpload, UploadMetadata};

/// Write-side capability of a video hosting platform.
///
/// A session handle is an opaque string that survives process restarts, so
/// it can be persisted on the job and reused by a later attempt.
#[async_trait]
pub trait DestinationProvider: Send + Sync + std::fmt::Debug + 'static {
    /// Return the provider type name (e.g. "local", "youtube").
    fn provider_type(&self) -> &str;

    /// Establish a resumable upload session for `total_size` bytes.
    async fn create_upload_session(
        &self,
        metadata: &UploadMetadata,
        total_size: u64,
    ) -> AppResult<String>;

    /// Write `bytes` at `offset`.
    ///
    /// Must be idempotent at the offset level: resubmitting bytes the
    /// destination already holds is acknowledged with `accepted = false` and
    /// the current `next_expected_offset`.
    async fn put_chunk(&self, handle: &str, offset: u64, bytes: Bytes) -> AppResult<ChunkAck>;

    /// Ask the destination how many bytes of the session it holds.
    async fn query_offset(&self, handle: &str) -> AppResult<u64>;

    /// Commit the session once every byte was accepted.
    async fn finalize(&self, handle: &str) -> AppResult<FinalizedUpload>;
}
