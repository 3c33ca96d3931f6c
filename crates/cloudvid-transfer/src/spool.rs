//! Local spool files holding downloaded bytes between the two legs.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use cloudvid_core::error::{AppError, ErrorKind};
use cloudvid_core::result::AppResult;
use cloudvid_core::types::JobId;

/// Directory of `<job_id>.part` files.
///
/// A spool file survives retries so the download leg can resume from its
/// length, and is removed once the job reaches a terminal state.
#[derive(Debug, Clone)]
pub struct Spool {
    dir: PathBuf,
}

impl Spool {
    /// Create the spool, making sure the directory exists.
    pub async fn new(dir: impl Into<PathBuf>) -> AppResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to create spool directory: {}", dir.display()),
                e,
            )
        })?;
        Ok(Self { dir })
    }

    /// Spool directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the spool file of a job.
    pub fn path(&self, job_id: JobId) -> PathBuf {
        self.dir.join(format!("{job_id}.part"))
    }

    /// Bytes already spooled for a job (0 when there is no spool file).
    pub async fn len(&self, job_id: JobId) -> AppResult<u64> {
        match fs::metadata(self.path(job_id)).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to stat spool file for job {job_id}"),
                e,
            )),
        }
    }

    /// Open the spool file for appending, truncated to `keep` bytes.
    pub async fn open_append(&self, job_id: JobId, keep: u64) -> AppResult<fs::File> {
        let path = self.path(job_id);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .await
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!("Failed to open spool file: {}", path.display()),
                    e,
                )
            })?;
        file.set_len(keep).await?;
        file.seek(SeekFrom::Start(keep)).await?;
        Ok(file)
    }

    /// Append a chunk to an open spool file.
    pub async fn append(file: &mut fs::File, chunk: &[u8]) -> AppResult<()> {
        file.write_all(chunk)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Storage, "Failed to write spool chunk", e))
    }

    /// Read up to `len` bytes of a job's spool starting at `offset`.
    pub async fn read_at(&self, job_id: JobId, offset: u64, len: usize) -> AppResult<Bytes> {
        let path = self.path(job_id);
        let mut file = fs::File::open(&path).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to open spool file: {}", path.display()),
                e,
            )
        })?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buf = BytesMut::zeroed(len);
        let mut filled = 0;
        while filled < len {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf.freeze())
    }

    /// Delete a job's spool file if present.
    pub async fn remove(&self, job_id: JobId) -> AppResult<()> {
        match fs::remove_file(self.path(job_id)).await {
            Ok(()) => {
                debug!(job_id = %job_id, "Removed spool file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to remove spool file for job {job_id}"),
                e,
            )),
        }
    }
}
