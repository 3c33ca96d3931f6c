//! Download-then-upload pipeline for a single job.
//!
//! The pipeline owns no job state. It reports every chunk to a
//! [`TransferObserver`], which persists progress and decides whether the
//! transfer continues. Cancellation surfaces as `ErrorKind::Cancelled`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use cloudvid_core::config::TransferConfig;
use cloudvid_core::error::{AppError, ErrorKind};
use cloudvid_core::result::AppResult;
use cloudvid_core::traits::{DestinationProvider, SourceProvider};
use cloudvid_core::types::{FinalizedUpload, JobId, UploadMetadata};

use crate::policy::SizePolicy;
use crate::progress::{Stage, StageProgress};
use crate::spool::Spool;

/// Observer answer after a progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Keep transferring.
    Continue,
    /// Stop at this chunk boundary.
    Cancel,
}

/// Receives pipeline events; implemented by the dispatcher.
#[async_trait]
pub trait TransferObserver: Send + Sync {
    /// Called after every chunk and at the start of each leg.
    async fn on_progress(&self, progress: StageProgress) -> AppResult<Checkpoint>;

    /// Called once a new upload session exists, before any byte is sent.
    async fn on_session_created(&self, handle: &str) -> AppResult<()>;
}

/// Everything the pipeline needs to know about one job.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Job identifier; names the spool file.
    pub job_id: JobId,
    /// Source file reference.
    pub file_id: String,
    /// Source checksum, compared with the destination's after finalize.
    pub checksum: String,
    /// Declared size in bytes.
    pub total_size: u64,
    /// Destination metadata.
    pub metadata: UploadMetadata,
    /// Session handle persisted by an earlier attempt.
    pub upload_session: Option<String>,
}

/// Streams one file from the source into the spool and from the spool to
/// the destination.
#[derive(Debug, Clone)]
pub struct TransferPipeline {
    source: Arc<dyn SourceProvider>,
    destination: Arc<dyn DestinationProvider>,
    spool: Spool,
    chunk_size: u64,
    size_policy: SizePolicy,
}

impl TransferPipeline {
    /// Create a new pipeline.
    pub fn new(
        source: Arc<dyn SourceProvider>,
        destination: Arc<dyn DestinationProvider>,
        spool: Spool,
        config: &TransferConfig,
    ) -> Self {
        Self {
            source,
            destination,
            spool,
            chunk_size: config.chunk_size_bytes,
            size_policy: SizePolicy::from_config(config),
        }
    }

    /// Size policy applied at pipeline entry.
    pub fn size_policy(&self) -> SizePolicy {
        self.size_policy
    }

    /// The spool used by the download leg.
    pub fn spool(&self) -> &Spool {
        &self.spool
    }

    /// Check the declared size before any network I/O.
    pub fn check_size(&self, request: &TransferRequest) -> AppResult<Option<String>> {
        self.size_policy.check(request.total_size)
    }

    /// Spool the source file, resuming from whatever an earlier attempt left.
    ///
    /// Returns the number of spooled bytes, which equals the declared size.
    pub async fn download(
        &self,
        request: &TransferRequest,
        observer: &dyn TransferObserver,
    ) -> AppResult<u64> {
        let total = request.total_size;
        let mut downloaded = self.spool.len(request.job_id).await?;
        if downloaded > total {
            debug!(job_id = %request.job_id, downloaded, total, "Spool larger than source, restarting");
            downloaded = 0;
        }

        let report = |downloaded| StageProgress {
            stage: Stage::Download,
            downloaded,
            uploaded: 0,
            total,
        };

        if observer.on_progress(report(downloaded)).await? == Checkpoint::Cancel {
            return Err(cancelled(request.job_id));
        }
        if downloaded == total {
            return Ok(downloaded);
        }

        info!(
            job_id = %request.job_id,
            file_id = %request.file_id,
            offset = downloaded,
            total,
            "Downloading from source"
        );

        let mut file = self.spool.open_append(request.job_id, downloaded).await?;
        let mut stream = self
            .source
            .open_ranged_read(&request.file_id, downloaded)
            .await?;

        let mut since_report = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if downloaded + chunk.len() as u64 > total {
                return Err(AppError::new(
                    ErrorKind::Validation,
                    format!(
                        "Source file {} is larger than its declared size of {total} bytes",
                        request.file_id
                    ),
                ));
            }
            Spool::append(&mut file, &chunk).await?;
            downloaded += chunk.len() as u64;
            since_report += chunk.len() as u64;

            if since_report >= self.chunk_size || downloaded == total {
                since_report = 0;
                file.flush().await?;
                if observer.on_progress(report(downloaded)).await? == Checkpoint::Cancel {
                    return Err(cancelled(request.job_id));
                }
            }
        }
        file.flush().await?;

        if downloaded < total {
            return Err(AppError::external(format!(
                "Source stream for {} ended at {downloaded} of {total} bytes",
                request.file_id
            )));
        }

        Ok(downloaded)
    }

    /// Return the session to upload into, creating one when the request
    /// carries none.
    pub async fn open_session(
        &self,
        request: &TransferRequest,
        observer: &dyn TransferObserver,
    ) -> AppResult<String> {
        if let Some(handle) = &request.upload_session {
            debug!(job_id = %request.job_id, "Reusing upload session");
            return Ok(handle.clone());
        }

        let handle = self
            .destination
            .create_upload_session(&request.metadata, request.total_size)
            .await?;
        observer.on_session_created(&handle).await?;
        info!(job_id = %request.job_id, "Created upload session");
        Ok(handle)
    }

    /// Send the spooled bytes the destination does not hold yet, then
    /// finalize.
    ///
    /// The resume point always comes from `query_offset`; nothing before it
    /// is sent again.
    pub async fn upload(
        &self,
        request: &TransferRequest,
        handle: &str,
        observer: &dyn TransferObserver,
    ) -> AppResult<FinalizedUpload> {
        let total = request.total_size;
        let mut offset = self.destination.query_offset(handle).await?;
        if offset > total {
            return Err(AppError::new(
                ErrorKind::Validation,
                format!("Destination holds {offset} bytes of a {total} byte upload"),
            ));
        }

        let report = |uploaded| StageProgress {
            stage: Stage::Upload,
            downloaded: total,
            uploaded,
            total,
        };

        info!(job_id = %request.job_id, offset, total, "Uploading to destination");
        if observer.on_progress(report(offset)).await? == Checkpoint::Cancel {
            return Err(cancelled(request.job_id));
        }

        while offset < total {
            let len = self.chunk_size.min(total - offset) as usize;
            let bytes = self.spool.read_at(request.job_id, offset, len).await?;
            if bytes.len() != len {
                return Err(AppError::storage(format!(
                    "Spool for job {} is shorter than expected",
                    request.job_id
                )));
            }

            let ack = self.destination.put_chunk(handle, offset, bytes).await?;
            if !ack.accepted {
                debug!(job_id = %request.job_id, offset, next = ack.next_expected_offset, "Chunk already held");
            }
            if ack.next_expected_offset <= offset || ack.next_expected_offset > total {
                return Err(AppError::external(format!(
                    "Destination acknowledged offset {} after a chunk at {offset}",
                    ack.next_expected_offset
                )));
            }
            offset = ack.next_expected_offset;

            if observer.on_progress(report(offset)).await? == Checkpoint::Cancel {
                return Err(cancelled(request.job_id));
            }
        }

        let finalized = self.destination.finalize(handle).await?;
        if let Some(actual) = &finalized.checksum {
            if !actual.eq_ignore_ascii_case(&request.checksum) {
                return Err(AppError::checksum_mismatch(&request.checksum, actual));
            }
        }

        info!(
            job_id = %request.job_id,
            destination_id = %finalized.destination_id,
            "Upload finalized"
        );
        Ok(finalized)
    }
}

fn cancelled(job_id: JobId) -> AppError {
    AppError::cancelled(format!("Job {job_id} cancelled"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::checksum::sha256_bytes;
    use crate::providers::{LocalDestination, LocalSource};

    const CHUNK: u64 = 256 * 1024;

    #[derive(Default)]
    struct Recorder {
        reports: Mutex<Vec<StageProgress>>,
        sessions: Mutex<Vec<String>>,
        cancel_after: Option<usize>,
    }

    #[async_trait]
    impl TransferObserver for Recorder {
        async fn on_progress(&self, progress: StageProgress) -> AppResult<Checkpoint> {
            let mut reports = self.reports.lock().unwrap();
            reports.push(progress);
            match self.cancel_after {
                Some(n) if reports.len() > n => Ok(Checkpoint::Cancel),
                _ => Ok(Checkpoint::Continue),
            }
        }

        async fn on_session_created(&self, handle: &str) -> AppResult<()> {
            self.sessions.lock().unwrap().push(handle.to_string());
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        pipeline: TransferPipeline,
        request: TransferRequest,
        data: Vec<u8>,
    }

    async fn fixture(size: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = |name: &str| dir.path().join(name).to_str().unwrap().to_string();

        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        tokio::fs::create_dir_all(root("src")).await.unwrap();
        tokio::fs::write(dir.path().join("src/movie.mp4"), &data).await.unwrap();

        let config = TransferConfig {
            chunk_size_bytes: CHUNK,
            ..TransferConfig::default()
        };
        let pipeline = TransferPipeline::new(
            Arc::new(LocalSource::new(&root("src")).await.unwrap()),
            Arc::new(LocalDestination::new(&root("dst")).await.unwrap()),
            Spool::new(root("spool")).await.unwrap(),
            &config,
        );
        let request = TransferRequest {
            job_id: JobId::new(),
            file_id: "movie.mp4".into(),
            checksum: sha256_bytes(&data),
            total_size: data.len() as u64,
            metadata: UploadMetadata {
                title: "movie".into(),
                ..UploadMetadata::default()
            },
            upload_session: None,
        };
        Fixture {
            _dir: dir,
            pipeline,
            request,
            data,
        }
    }

    #[tokio::test]
    async fn test_full_transfer_reports_monotonic_progress() {
        let fx = fixture(3 * CHUNK as usize + 17).await;
        let observer = Recorder::default();

        let spooled = fx.pipeline.download(&fx.request, &observer).await.unwrap();
        assert_eq!(spooled, fx.data.len() as u64);

        let handle = fx.pipeline.open_session(&fx.request, &observer).await.unwrap();
        let finalized = fx.pipeline.upload(&fx.request, &handle, &observer).await.unwrap();
        assert_eq!(finalized.checksum.as_deref(), Some(fx.request.checksum.as_str()));

        let reports = observer.reports.lock().unwrap();
        let percents: Vec<f64> = reports.iter().map(StageProgress::percent).collect();
        assert!(percents.windows(2).all(|w| w[1] >= w[0]));
        assert!(percents.iter().all(|p| *p <= 99.9));
        assert_eq!(observer.sessions.lock().unwrap().as_slice(), &[handle]);
    }

    #[tokio::test]
    async fn test_download_resumes_from_spool() {
        let fx = fixture(2 * CHUNK as usize).await;
        let partial = &fx.data[..CHUNK as usize];
        tokio::fs::write(fx.pipeline.spool().path(fx.request.job_id), partial)
            .await
            .unwrap();

        let observer = Recorder::default();
        fx.pipeline.download(&fx.request, &observer).await.unwrap();

        let first = observer.reports.lock().unwrap()[0];
        assert_eq!(first.downloaded, CHUNK);
        let spooled = tokio::fs::read(fx.pipeline.spool().path(fx.request.job_id))
            .await
            .unwrap();
        assert_eq!(spooled, fx.data);
    }

    #[tokio::test]
    async fn test_cancel_between_chunks() {
        let fx = fixture(4 * CHUNK as usize).await;
        let observer = Recorder {
            cancel_after: Some(2),
            ..Recorder::default()
        };

        let err = fx.pipeline.download(&fx.request, &observer).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(observer.reports.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_oversized_file_rejected_before_io() {
        let mut fx = fixture(16).await;
        fx.request.total_size = TransferConfig::default().max_file_size_bytes + 1;
        let err = fx.pipeline.check_size(&fx.request).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FileTooLarge);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_detected() {
        let mut fx = fixture(1024).await;
        fx.request.checksum = "0".repeat(64);
        let observer = Recorder::default();

        fx.pipeline.download(&fx.request, &observer).await.unwrap();
        let handle = fx.pipeline.open_session(&fx.request, &observer).await.unwrap();
        let err = fx
            .pipeline
            .upload(&fx.request, &handle, &observer)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ChecksumMismatch);
    }
}
