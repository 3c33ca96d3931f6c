//! Local filesystem source and destination providers.
//!
//! The source serves files below a root directory. The destination keeps
//! resumable sessions as `.part` files next to a JSON sidecar and publishes
//! finalized uploads under `videos/`.

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

use cloudvid_core::error::{AppError, ErrorKind};
use cloudvid_core::result::AppResult;
use cloudvid_core::traits::{ByteStream, DestinationProvider, SourceProvider};
use cloudvid_core::types::{ChunkAck, FileDescriptor, FinalizedUpload, UploadMetadata};

use crate::checksum::sha256_stream;

const READ_CAPACITY: usize = 256 * 1024;

/// Source provider reading from a local directory tree.
#[derive(Debug, Clone)]
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    /// Create a new local source rooted at the given path.
    pub async fn new(root_path: &str) -> AppResult<Self> {
        let root = PathBuf::from(root_path);
        fs::create_dir_all(&root).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to create source root: {}", root.display()),
                e,
            )
        })?;
        Ok(Self { root })
    }

    fn resolve(&self, file_ref: &str) -> AppResult<PathBuf> {
        resolve_within(&self.root, file_ref)
    }

    async fn open_at(&self, file_ref: &str, offset: u64) -> AppResult<fs::File> {
        let path = self.resolve(file_ref)?;
        let mut file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::source_missing(format!("Source file not found: {file_ref}"))
            } else {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!("Failed to open source file: {file_ref}"),
                    e,
                )
            }
        })?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        Ok(file)
    }
}

#[async_trait]
impl SourceProvider for LocalSource {
    fn provider_type(&self) -> &str {
        "local"
    }

    async fn list_files(&self, folder_ref: &str) -> AppResult<Vec<FileDescriptor>> {
        let dir = self.resolve(folder_ref)?;
        let mut entries = fs::read_dir(&dir).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::not_found(format!("Folder not found: {folder_ref}"))
            } else {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!("Failed to list folder: {folder_ref}"),
                    e,
                )
            }
        })?;

        let prefix = folder_ref.trim_matches('/');
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_id = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            files.push(describe_entry(file_id, name, &meta));
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn describe(&self, file_ref: &str) -> AppResult<FileDescriptor> {
        let path = self.resolve(file_ref)?;
        let meta = fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::source_missing(format!("Source file not found: {file_ref}"))
            } else {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!("Failed to stat source file: {file_ref}"),
                    e,
                )
            }
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_ref.to_string());
        Ok(describe_entry(file_ref.trim_matches('/').to_string(), name, &meta))
    }

    async fn open_ranged_read(&self, file_ref: &str, offset: u64) -> AppResult<ByteStream> {
        let file = self.open_at(file_ref, offset).await?;
        let stream = ReaderStream::with_capacity(file, READ_CAPACITY);
        Ok(Box::pin(stream.map(|r| r.map_err(AppError::from))))
    }

    async fn file_checksum(&self, file_ref: &str) -> AppResult<String> {
        let file = self.open_at(file_ref, 0).await?;
        let stream = ReaderStream::with_capacity(file, READ_CAPACITY);
        sha256_stream(Box::pin(stream.map(|r| r.map_err(AppError::from)))).await
    }
}

fn describe_entry(file_id: String, name: String, meta: &std::fs::Metadata) -> FileDescriptor {
    FileDescriptor {
        mime_type: guess_video_mime(&name).map(str::to_string),
        modified_at: meta.modified().ok().map(chrono::DateTime::from),
        file_id,
        name,
        size_bytes: meta.len(),
        checksum: None,
    }
}

fn guess_video_mime(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "mp4" | "m4v" => Some("video/mp4"),
        "mov" => Some("video/quicktime"),
        "mkv" => Some("video/x-matroska"),
        "webm" => Some("video/webm"),
        "avi" => Some("video/x-msvideo"),
        "wmv" => Some("video/x-ms-wmv"),
        "flv" => Some("video/x-flv"),
        _ => None,
    }
}

/// Join `relative` to `root`, rejecting anything that escapes it.
fn resolve_within(root: &Path, relative: &str) -> AppResult<PathBuf> {
    let clean = Path::new(relative.trim_start_matches('/'));
    if clean
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(AppError::validation(format!("Invalid path: {relative}")));
    }
    Ok(root.join(clean))
}

/// Session sidecar persisted next to the `.part` file.
#[derive(Debug, Serialize, Deserialize)]
struct SessionInfo {
    metadata: UploadMetadata,
    total_size: u64,
}

/// Destination provider writing into a local directory.
#[derive(Debug, Clone)]
pub struct LocalDestination {
    root: PathBuf,
}

impl LocalDestination {
    /// Create a new local destination rooted at the given path.
    pub async fn new(root_path: &str) -> AppResult<Self> {
        let root = PathBuf::from(root_path);
        for dir in [root.join("sessions"), root.join("videos")] {
            fs::create_dir_all(&dir).await.map_err(|e| {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!("Failed to create destination directory: {}", dir.display()),
                    e,
                )
            })?;
        }
        Ok(Self { root })
    }

    fn session_id(handle: &str) -> AppResult<Uuid> {
        Uuid::parse_str(handle)
            .map_err(|_| AppError::not_found(format!("Unknown upload session: {handle}")))
    }

    fn part_path(&self, id: Uuid) -> PathBuf {
        self.root.join("sessions").join(format!("{id}.part"))
    }

    fn info_path(&self, id: Uuid) -> PathBuf {
        self.root.join("sessions").join(format!("{id}.json"))
    }

    async fn load_session(&self, handle: &str) -> AppResult<(Uuid, SessionInfo)> {
        let id = Self::session_id(handle)?;
        let raw = fs::read(self.info_path(id)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::not_found(format!("Unknown upload session: {handle}"))
            } else {
                AppError::with_source(ErrorKind::Storage, "Failed to read session info", e)
            }
        })?;
        Ok((id, serde_json::from_slice(&raw)?))
    }

    async fn held_bytes(&self, id: Uuid) -> AppResult<u64> {
        match fs::metadata(self.part_path(id)).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DestinationProvider for LocalDestination {
    fn provider_type(&self) -> &str {
        "local"
    }

    async fn create_upload_session(
        &self,
        metadata: &UploadMetadata,
        total_size: u64,
    ) -> AppResult<String> {
        if metadata.title.trim().is_empty() {
            return Err(AppError::invalid_metadata("Title must not be empty"));
        }

        let id = Uuid::new_v4();
        let info = SessionInfo {
            metadata: metadata.clone(),
            total_size,
        };
        fs::write(self.info_path(id), serde_json::to_vec(&info)?).await?;
        fs::File::create(self.part_path(id)).await?;

        debug!(session = %id, total_size, "Created local upload session");
        Ok(id.to_string())
    }

    async fn put_chunk(&self, handle: &str, offset: u64, bytes: Bytes) -> AppResult<ChunkAck> {
        let (id, info) = self.load_session(handle).await?;
        let held = self.held_bytes(id).await?;
        let end = offset + bytes.len() as u64;

        if end <= held || offset > held {
            return Ok(ChunkAck {
                accepted: false,
                next_expected_offset: held,
            });
        }
        if end > info.total_size {
            return Err(AppError::validation(format!(
                "Chunk ends at {end}, past the declared size of {}",
                info.total_size
            )));
        }

        let skip = (held - offset) as usize;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(self.part_path(id))
            .await?;
        file.write_all(&bytes[skip..]).await?;
        file.flush().await?;

        Ok(ChunkAck {
            accepted: true,
            next_expected_offset: end,
        })
    }

    async fn query_offset(&self, handle: &str) -> AppResult<u64> {
        let (id, _) = self.load_session(handle).await?;
        self.held_bytes(id).await
    }

    async fn finalize(&self, handle: &str) -> AppResult<FinalizedUpload> {
        let (id, info) = self.load_session(handle).await?;
        let held = self.held_bytes(id).await?;
        if held != info.total_size {
            return Err(AppError::validation(format!(
                "Cannot finalize: holding {held} of {} bytes",
                info.total_size
            )));
        }

        let published = self.root.join("videos").join(format!("{id}.bin"));
        fs::rename(self.part_path(id), &published).await?;
        fs::remove_file(self.info_path(id)).await?;

        let file = fs::File::open(&published).await?;
        let stream = ReaderStream::with_capacity(file, READ_CAPACITY);
        let checksum = sha256_stream(Box::pin(stream.map(|r| r.map_err(AppError::from)))).await?;

        debug!(session = %id, title = %info.metadata.title, "Finalized local upload");
        Ok(FinalizedUpload {
            destination_id: id.to_string(),
            url: format!("file://{}", published.display()),
            revision_tag: checksum[..16].to_string(),
            checksum: Some(checksum),
            units_consumed: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::sha256_bytes;

    async fn source_with(dir: &Path, name: &str, data: &[u8]) -> LocalSource {
        tokio::fs::write(dir.join(name), data).await.unwrap();
        LocalSource::new(dir.to_str().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_source_ranged_read_and_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_with(dir.path(), "clip.mp4", b"0123456789").await;

        let mut stream = source.open_ranged_read("clip.mp4", 6).await.unwrap();
        let mut read = Vec::new();
        while let Some(chunk) = stream.next().await {
            read.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(read, b"6789");

        assert_eq!(
            source.file_checksum("clip.mp4").await.unwrap(),
            sha256_bytes(b"0123456789")
        );
        let described = source.describe("clip.mp4").await.unwrap();
        assert_eq!(described.size_bytes, 10);
        assert_eq!(described.mime_type.as_deref(), Some("video/mp4"));
    }

    #[tokio::test]
    async fn test_source_missing_and_escape() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalSource::new(dir.path().to_str().unwrap()).await.unwrap();

        let err = source.open_ranged_read("gone.mp4", 0).await.err().unwrap();
        assert_eq!(err.kind, ErrorKind::SourceMissing);
        let err = source.describe("../etc/passwd").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_list_files_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        let source = source_with(dir.path(), "b.mov", b"xx").await;
        tokio::fs::write(dir.path().join("a.mkv"), b"x").await.unwrap();

        let files = source.list_files("").await.unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.mkv", "b.mov"]);
    }

    #[tokio::test]
    async fn test_destination_chunks_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let dest = LocalDestination::new(dir.path().to_str().unwrap()).await.unwrap();
        let metadata = UploadMetadata {
            title: "clip".into(),
            ..UploadMetadata::default()
        };
        let handle = dest.create_upload_session(&metadata, 6).await.unwrap();

        let ack = dest.put_chunk(&handle, 0, Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(ack, ChunkAck { accepted: true, next_expected_offset: 3 });

        let replay = dest.put_chunk(&handle, 0, Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(replay, ChunkAck { accepted: false, next_expected_offset: 3 });

        let gap = dest.put_chunk(&handle, 5, Bytes::from_static(b"f")).await.unwrap();
        assert!(!gap.accepted);
        assert_eq!(dest.query_offset(&handle).await.unwrap(), 3);

        // Overlapping chunk only appends the new tail.
        let ack = dest.put_chunk(&handle, 2, Bytes::from_static(b"cdef")).await.unwrap();
        assert_eq!(ack.next_expected_offset, 6);

        let done = dest.finalize(&handle).await.unwrap();
        assert_eq!(done.checksum, Some(sha256_bytes(b"abcdef")));
        assert!(dest.query_offset(&handle).await.is_err());
    }

    #[tokio::test]
    async fn test_destination_rejects_empty_title() {
        let dir = tempfile::tempdir().unwrap();
        let dest = LocalDestination::new(dir.path().to_str().unwrap()).await.unwrap();
        let err = dest
            .create_upload_session(&UploadMetadata::default(), 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidMetadata);
    }

    #[tokio::test]
    async fn test_finalize_requires_all_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let dest = LocalDestination::new(dir.path().to_str().unwrap()).await.unwrap();
        let metadata = UploadMetadata {
            title: "clip".into(),
            ..UploadMetadata::default()
        };
        let handle = dest.create_upload_session(&metadata, 4).await.unwrap();
        dest.put_chunk(&handle, 0, Bytes::from_static(b"ab")).await.unwrap();
        assert_eq!(dest.finalize(&handle).await.unwrap_err().kind, ErrorKind::Validation);
    }
}
