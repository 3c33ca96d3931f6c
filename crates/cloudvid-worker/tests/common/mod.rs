//! Shared fixtures for dispatcher integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Notify;

use cloudvid_core::config::{QuotaConfig, RetryConfig, TransferConfig, WorkerConfig};
use cloudvid_core::error::{AppError, ErrorKind};
use cloudvid_core::result::AppResult;
use cloudvid_core::traits::{ByteStream, Clock, DestinationProvider, SourceProvider};
use cloudvid_core::types::{
    BatchId, ChunkAck, FileDescriptor, FinalizedUpload, JobId, UploadMetadata,
};
use cloudvid_database::memory::{MemoryHistoryStore, MemoryJobStore, MemoryQuotaStore};
use cloudvid_database::{HistoryStore, JobStore, QueueSummary};
use cloudvid_entity::history::{HistoryRecord, NewHistoryRecord};
use cloudvid_entity::job::{Job, JobStatus, JobUpdate, NewJob, SourceRef};
use cloudvid_transfer::{SizePolicy, Spool, TransferPipeline};
use cloudvid_worker::queue::{EnqueueOutcome, EnqueueRequest};
use cloudvid_worker::{Dispatcher, HistoryIndex, JobQueue, QuotaTracker, RetryPolicy};

/// Streamed chunk size of the fake source and upload chunk size.
pub const CHUNK: u64 = 100;

// ── Clock ────────────────────────────────────────────────────────────

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ── Source ───────────────────────────────────────────────────────────

/// In-memory source serving fixed byte buffers.
#[derive(Debug, Default)]
pub struct FakeSource {
    files: Mutex<HashMap<String, Bytes>>,
    opens: Mutex<Vec<(String, u64)>>,
}

impl FakeSource {
    pub fn add(&self, file_id: &str, data: Vec<u8>) {
        self.files
            .lock()
            .unwrap()
            .insert(file_id.to_string(), Bytes::from(data));
    }

    pub fn remove(&self, file_id: &str) {
        self.files.lock().unwrap().remove(file_id);
    }

    /// `(file_id, offset)` of every ranged read opened.
    pub fn opens(&self) -> Vec<(String, u64)> {
        self.opens.lock().unwrap().clone()
    }

    fn get(&self, file_id: &str) -> AppResult<Bytes> {
        self.files
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| AppError::source_missing(format!("{file_id} is gone")))
    }
}

#[async_trait]
impl SourceProvider for FakeSource {
    fn provider_type(&self) -> &str {
        "fake"
    }

    async fn list_files(&self, _folder_ref: &str) -> AppResult<Vec<FileDescriptor>> {
        let files = self.files.lock().unwrap();
        Ok(files
            .iter()
            .map(|(id, data)| FileDescriptor {
                file_id: id.clone(),
                name: id.clone(),
                size_bytes: data.len() as u64,
                checksum: None,
                mime_type: None,
                modified_at: None,
            })
            .collect())
    }

    async fn describe(&self, file_ref: &str) -> AppResult<FileDescriptor> {
        let data = self.get(file_ref)?;
        Ok(FileDescriptor {
            file_id: file_ref.to_string(),
            name: file_ref.to_string(),
            size_bytes: data.len() as u64,
            checksum: None,
            mime_type: None,
            modified_at: None,
        })
    }

    async fn open_ranged_read(&self, file_ref: &str, offset: u64) -> AppResult<ByteStream> {
        let data = self.get(file_ref)?;
        self.opens
            .lock()
            .unwrap()
            .push((file_ref.to_string(), offset));

        let chunks: Vec<AppResult<Bytes>> = (offset as usize..data.len())
            .step_by(CHUNK as usize)
            .map(|start| {
                let end = (start + CHUNK as usize).min(data.len());
                Ok(data.slice(start..end))
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn file_checksum(&self, file_ref: &str) -> AppResult<String> {
        Ok(format!("fake-{}", self.get(file_ref)?.len()))
    }
}

// ── Destination ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Session {
    data: Vec<u8>,
    total: u64,
}

#[derive(Debug, Default)]
struct DestinationState {
    sessions: HashMap<String, Session>,
    created: u32,
    finalized: u32,
    puts: Vec<(String, u64, usize)>,
    queries: Vec<(String, u64)>,
    fail_put_at: Option<(u64, ErrorKind, u32)>,
    fail_create: Option<ErrorKind>,
    units_consumed: Option<u32>,
}

/// Rendezvous used to stop an upload at a chunk boundary.
#[derive(Debug, Default)]
pub struct Pause {
    pub offset: u64,
    pub reached: Notify,
    pub resume: Notify,
}

/// In-memory resumable destination with scripted failures.
#[derive(Debug, Default)]
pub struct FakeDestination {
    state: Mutex<DestinationState>,
    pause: Mutex<Option<Arc<Pause>>>,
}

impl FakeDestination {
    /// Fail `times` puts at `offset` with `kind`.
    pub fn fail_put_at(&self, offset: u64, kind: ErrorKind, times: u32) {
        self.state.lock().unwrap().fail_put_at = Some((offset, kind, times));
    }

    /// Fail every session creation with `kind`.
    pub fn fail_create_with(&self, kind: ErrorKind) {
        self.state.lock().unwrap().fail_create = Some(kind);
    }

    /// Units reported as consumed by finalize.
    pub fn report_units(&self, units: u32) {
        self.state.lock().unwrap().units_consumed = Some(units);
    }

    /// Block the next put at `offset` until resumed.
    pub fn pause_at(&self, offset: u64) -> Arc<Pause> {
        let pause = Arc::new(Pause {
            offset,
            ..Pause::default()
        });
        *self.pause.lock().unwrap() = Some(pause.clone());
        pause
    }

    /// Offsets of every put, in order.
    pub fn put_offsets(&self) -> Vec<u64> {
        self.state.lock().unwrap().puts.iter().map(|p| p.1).collect()
    }

    /// Total bytes sent to the destination.
    pub fn bytes_received(&self) -> u64 {
        self.state
            .lock()
            .unwrap()
            .puts
            .iter()
            .map(|p| p.2 as u64)
            .sum()
    }

    /// Offsets returned by `query_offset`, in order.
    pub fn queried_offsets(&self) -> Vec<u64> {
        self.state
            .lock()
            .unwrap()
            .queries
            .iter()
            .map(|q| q.1)
            .collect()
    }

    pub fn sessions_created(&self) -> u32 {
        self.state.lock().unwrap().created
    }

    pub fn finalized(&self) -> u32 {
        self.state.lock().unwrap().finalized
    }
}

#[async_trait]
impl DestinationProvider for FakeDestination {
    fn provider_type(&self) -> &str {
        "fake"
    }

    async fn create_upload_session(
        &self,
        _metadata: &UploadMetadata,
        total_size: u64,
    ) -> AppResult<String> {
        let mut state = self.state.lock().unwrap();
        if let Some(kind) = state.fail_create {
            return Err(AppError::new(kind, "session creation refused"));
        }
        state.created += 1;
        let handle = format!("session-{}", state.created);
        state.sessions.insert(
            handle.clone(),
            Session {
                data: Vec::new(),
                total: total_size,
            },
        );
        Ok(handle)
    }

    async fn put_chunk(&self, handle: &str, offset: u64, bytes: Bytes) -> AppResult<ChunkAck> {
        let pause = {
            let mut slot = self.pause.lock().unwrap();
            if slot.as_ref().is_some_and(|p| p.offset == offset) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(pause) = pause {
            pause.reached.notify_one();
            pause.resume.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some((at, kind, times)) = state.fail_put_at {
            if at == offset && times > 0 {
                state.fail_put_at = Some((at, kind, times - 1));
                return Err(AppError::new(kind, format!("put at {offset} failed")));
            }
        }
        state.puts.push((handle.to_string(), offset, bytes.len()));

        let session = state
            .sessions
            .get_mut(handle)
            .ok_or_else(|| AppError::not_found("unknown session"))?;
        let held = session.data.len() as u64;
        let end = offset + bytes.len() as u64;
        if end <= held || offset > held {
            return Ok(ChunkAck {
                accepted: false,
                next_expected_offset: held,
            });
        }
        let skip = (held - offset) as usize;
        session.data.extend_from_slice(&bytes[skip..]);
        Ok(ChunkAck {
            accepted: true,
            next_expected_offset: end,
        })
    }

    async fn query_offset(&self, handle: &str) -> AppResult<u64> {
        let mut state = self.state.lock().unwrap();
        let held = state
            .sessions
            .get(handle)
            .map(|s| s.data.len() as u64)
            .ok_or_else(|| AppError::not_found("unknown session"))?;
        state.queries.push((handle.to_string(), held));
        Ok(held)
    }

    async fn finalize(&self, handle: &str) -> AppResult<FinalizedUpload> {
        let mut state = self.state.lock().unwrap();
        let session = state
            .sessions
            .get(handle)
            .ok_or_else(|| AppError::not_found("unknown session"))?;
        if session.data.len() as u64 != session.total {
            return Err(AppError::validation("incomplete upload"));
        }
        state.finalized += 1;
        Ok(FinalizedUpload {
            destination_id: format!("video-{handle}"),
            url: format!("https://videos.example/watch/{handle}"),
            revision_tag: "rev-1".into(),
            checksum: None,
            units_consumed: state.units_consumed,
        })
    }
}

// ── Job store wrapper ────────────────────────────────────────────────

/// Job store that records every successful transition and checks the
/// single-active rule after each one.
#[derive(Debug)]
pub struct RecordingJobStore {
    inner: MemoryJobStore,
    transitions: Mutex<Vec<(JobId, JobStatus, JobStatus, f64, String)>>,
    max_active: Mutex<usize>,
}

impl RecordingJobStore {
    pub fn new(inner: MemoryJobStore) -> Self {
        Self {
            inner,
            transitions: Mutex::new(Vec::new()),
            max_active: Mutex::new(0),
        }
    }

    /// Status edges taken by a job, in order, excluding progress writes.
    pub fn edges(&self, job_id: JobId) -> Vec<(JobStatus, JobStatus)> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.0 == job_id && t.1 != t.2)
            .map(|t| (t.1, t.2))
            .collect()
    }

    /// Every edge taken by any job.
    pub fn all_edges(&self) -> Vec<(JobStatus, JobStatus)> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .map(|t| (t.1, t.2))
            .collect()
    }

    /// Stored progress after each transition of a job.
    pub fn progress_trail(&self, job_id: JobId) -> Vec<(JobStatus, JobStatus, f64)> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.0 == job_id)
            .map(|t| (t.1, t.2, t.3))
            .collect()
    }

    /// Stored message after each transition of a job.
    pub fn messages(&self, job_id: JobId) -> Vec<String> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.0 == job_id)
            .map(|t| t.4.clone())
            .collect()
    }

    /// Highest number of simultaneously active jobs ever observed.
    pub fn max_active(&self) -> usize {
        *self.max_active.lock().unwrap()
    }
}

#[async_trait]
impl JobStore for RecordingJobStore {
    async fn create(&self, data: NewJob) -> AppResult<Job> {
        self.inner.create(data).await
    }

    async fn find_by_id(&self, id: JobId) -> AppResult<Option<Job>> {
        self.inner.find_by_id(id).await
    }

    async fn fetch_next_pending(&self) -> AppResult<Option<Job>> {
        self.inner.fetch_next_pending().await
    }

    async fn transition(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        update: JobUpdate,
    ) -> AppResult<Job> {
        let job = self.inner.transition(id, from, to, update).await?;
        self.transitions
            .lock()
            .unwrap()
            .push((id, from, to, job.progress, job.message.clone()));

        let active = self
            .inner
            .list_by_status(&[JobStatus::Downloading, JobStatus::Uploading])
            .await?
            .len();
        let mut max = self.max_active.lock().unwrap();
        *max = (*max).max(active);
        Ok(job)
    }

    async fn request_cancel(&self, id: JobId) -> AppResult<Job> {
        self.inner.request_cancel(id).await
    }

    async fn is_cancel_requested(&self, id: JobId) -> AppResult<bool> {
        self.inner.is_cancel_requested(id).await
    }

    async fn list_by_owner(&self, owner: &str) -> AppResult<Vec<Job>> {
        self.inner.list_by_owner(owner).await
    }

    async fn list_by_batch(&self, batch_id: BatchId) -> AppResult<Vec<Job>> {
        self.inner.list_by_batch(batch_id).await
    }

    async fn list_by_status(&self, statuses: &[JobStatus]) -> AppResult<Vec<Job>> {
        self.inner.list_by_status(statuses).await
    }

    async fn find_open_by_source(&self, owner: &str, file_id: &str) -> AppResult<Option<Job>> {
        self.inner.find_open_by_source(owner, file_id).await
    }

    async fn delete(&self, id: JobId) -> AppResult<bool> {
        self.inner.delete(id).await
    }

    async fn delete_finished(&self, owner: Option<&str>) -> AppResult<u64> {
        self.inner.delete_finished(owner).await
    }

    async fn summary(&self, owner: Option<&str>) -> AppResult<QueueSummary> {
        self.inner.summary(owner).await
    }
}

// ── History store wrapper ────────────────────────────────────────────

/// History store whose writes can be made to fail.
#[derive(Debug)]
pub struct FlakyHistoryStore {
    inner: MemoryHistoryStore,
    failing_records: Mutex<u32>,
    record_calls: Mutex<u32>,
}

impl FlakyHistoryStore {
    pub fn new(inner: MemoryHistoryStore) -> Self {
        Self {
            inner,
            failing_records: Mutex::new(0),
            record_calls: Mutex::new(0),
        }
    }

    /// Fail the next `times` record calls.
    pub fn fail_records(&self, times: u32) {
        *self.failing_records.lock().unwrap() = times;
    }

    pub fn record_calls(&self) -> u32 {
        *self.record_calls.lock().unwrap()
    }
}

#[async_trait]
impl HistoryStore for FlakyHistoryStore {
    async fn lookup(&self, checksum: &str) -> AppResult<Option<HistoryRecord>> {
        self.inner.lookup(checksum).await
    }

    async fn record(&self, data: NewHistoryRecord) -> AppResult<HistoryRecord> {
        *self.record_calls.lock().unwrap() += 1;
        {
            let mut failing = self.failing_records.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(AppError::database("connection reset"));
            }
        }
        self.inner.record(data).await
    }

    async fn list_recent(&self, limit: u32) -> AppResult<Vec<HistoryRecord>> {
        self.inner.list_recent(limit).await
    }
}

// ── Harness ──────────────────────────────────────────────────────────

/// Tunables of a test harness.
#[derive(Debug, Clone)]
pub struct Options {
    pub budget_units: u32,
    pub upload_cost_units: u32,
    pub max_file_size_bytes: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            budget_units: 10_000,
            upload_cost_units: 1_600,
            max_file_size_bytes: 1_000_000,
        }
    }
}

/// Fully wired engine over in-memory stores and fake providers.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub clock: Arc<ManualClock>,
    pub store: Arc<RecordingJobStore>,
    pub history: MemoryHistoryStore,
    /// Store the dispatchers write history through.
    pub history_writes: Arc<FlakyHistoryStore>,
    pub quota: Arc<QuotaTracker>,
    pub source: Arc<FakeSource>,
    pub destination: Arc<FakeDestination>,
    pub queue: JobQueue,
    pub dispatcher: Arc<Dispatcher>,
    pub transfer_config: TransferConfig,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with(Options::default()).await
    }

    pub async fn with(options: Options) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(RecordingJobStore::new(MemoryJobStore::with_clock(
            clock.clone(),
        )));
        let history = MemoryHistoryStore::new();
        let history_writes = Arc::new(FlakyHistoryStore::new(history.clone()));
        let quota = Arc::new(QuotaTracker::new(
            Arc::new(MemoryQuotaStore::new()),
            clock.clone(),
            QuotaConfig {
                budget_units: options.budget_units,
                upload_cost_units: options.upload_cost_units,
                ..QuotaConfig::default()
            },
        ));
        let transfer_config = TransferConfig {
            chunk_size_bytes: CHUNK,
            max_file_size_bytes: options.max_file_size_bytes,
            warn_file_size_bytes: options.max_file_size_bytes / 2,
            spool_dir: dir.path().join("spool").to_string_lossy().into_owned(),
            ..TransferConfig::default()
        };

        let queue = JobQueue::new(
            store.clone(),
            HistoryIndex::new(Arc::new(history.clone())),
            SizePolicy::from_config(&transfer_config),
            3,
        );

        let source = Arc::new(FakeSource::default());
        let destination = Arc::new(FakeDestination::default());
        let dispatcher = build_dispatcher(
            &store,
            &history_writes,
            &quota,
            &source,
            &destination,
            &clock,
            &transfer_config,
        )
        .await;

        Self {
            dir,
            clock,
            store,
            history,
            history_writes,
            quota,
            source,
            destination,
            queue,
            dispatcher: Arc::new(dispatcher),
            transfer_config,
        }
    }

    /// Another dispatcher over the same stores and providers.
    pub async fn new_dispatcher(&self) -> Dispatcher {
        build_dispatcher(
            &self.store,
            &self.history_writes,
            &self.quota,
            &self.source,
            &self.destination,
            &self.clock,
            &self.transfer_config,
        )
        .await
    }

    /// Register a source file and enqueue it.
    pub async fn enqueue(&self, file_id: &str, checksum: &str, data: Vec<u8>) -> EnqueueOutcome {
        self.enqueue_with(file_id, checksum, data, true, None).await
    }

    pub async fn enqueue_with(
        &self,
        file_id: &str,
        checksum: &str,
        data: Vec<u8>,
        skip_duplicates: bool,
        max_retries: Option<i32>,
    ) -> EnqueueOutcome {
        let size = data.len() as i64;
        self.source.add(file_id, data);
        self.queue
            .enqueue(EnqueueRequest {
                owner: "alice".into(),
                source: SourceRef {
                    file_id: file_id.into(),
                    checksum: checksum.into(),
                    display_name: format!("{file_id}.mp4"),
                    size_bytes: size,
                    mime_type: Some("video/mp4".into()),
                },
                metadata: UploadMetadata {
                    title: file_id.into(),
                    ..UploadMetadata::default()
                },
                skip_duplicates,
                max_retries,
            })
            .await
            .unwrap()
    }

    pub async fn job(&self, id: JobId) -> Job {
        self.store.find_by_id(id).await.unwrap().unwrap()
    }

    /// Move the clock past the job's retry delay.
    pub async fn make_eligible(&self, id: JobId) {
        if let Some(at) = self.job(id).await.next_eligible_at {
            self.clock.set(at);
        }
    }
}

async fn build_dispatcher(
    store: &Arc<RecordingJobStore>,
    history: &Arc<FlakyHistoryStore>,
    quota: &Arc<QuotaTracker>,
    source: &Arc<FakeSource>,
    destination: &Arc<FakeDestination>,
    clock: &Arc<ManualClock>,
    transfer_config: &TransferConfig,
) -> Dispatcher {
    let spool = Spool::new(&transfer_config.spool_dir).await.unwrap();
    let pipeline = TransferPipeline::new(
        source.clone(),
        destination.clone(),
        spool,
        transfer_config,
    );
    Dispatcher::new(
        store.clone(),
        HistoryIndex::new(history.clone()),
        quota.clone(),
        RetryPolicy::from_config(&RetryConfig::default()),
        pipeline,
        clock.clone(),
        WorkerConfig::default(),
    )
}

/// Unwrap an accepted enqueue.
pub fn accepted(outcome: EnqueueOutcome) -> Job {
    match outcome {
        EnqueueOutcome::Accepted(job) => job,
        other => panic!("expected an accepted job, got {other:?}"),
    }
}

/// `len` deterministic bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
