//! Job admission and background transfer processing for CloudVid.
//!
//! This crate provides:
//! - A job queue that admits single files and batches
//! - The history index used for content deduplication
//! - The quota tracker gating upload attempts against the daily budget
//! - The retry policy classifying pipeline failures
//! - The single-flight dispatcher driving jobs through the pipeline

pub mod dedup;
pub mod dispatcher;
pub mod queue;
pub mod quota;
pub mod retry;

pub use dedup::HistoryIndex;
pub use dispatcher::{CycleOutcome, Dispatcher, DispatcherHandle};
pub use queue::{BatchOutcome, EnqueueOutcome, JobQueue};
pub use quota::{QuotaTracker, QuotaWindow, Reservation};
pub use retry::{FailureClass, RetryDecision, RetryPolicy};
