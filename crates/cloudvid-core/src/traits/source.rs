//! Source provider capability: where files are read from.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::result::AppResult;
use crate::types::FileDescriptor;

/// A lazily produced, finite sequence of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = AppResult<Bytes>> + Send>>;

/// Read-side capability of a cloud storage provider.
///
/// Implementations must support ranged reads so the download stage can
/// resume a partially spooled file instead of starting over.
#[async_trait]
pub trait SourceProvider: Send + Sync + std::fmt::Debug + 'static {
    /// Return the provider type name (e.g. "local", "drive").
    fn provider_type(&self) -> &str;

    /// List the files inside a folder.
    async fn list_files(&self, folder_ref: &str) -> AppResult<Vec<FileDescriptor>>;

    /// Describe a single file.
    async fn describe(&self, file_ref: &str) -> AppResult<FileDescriptor>;

    /// Open a read starting at `offset` and running to the end of the file.
    ///
    /// Fails with `ErrorKind::SourceMissing` when the file no longer exists.
    async fn open_ranged_read(&self, file_ref: &str, offset: u64) -> AppResult<ByteStream>;

    /// Return the content checksum (hex) of the file.
    async fn file_checksum(&self, file_ref: &str) -> AppResult<String>;
}
