//! # cloudvid-entity
//!
//! Domain entity models for the transfer engine: transfer jobs and their
//! state graph, completed-transfer history, and the upload budget window.

pub mod history;
pub mod job;
pub mod quota;

pub use history::{HistoryRecord, NewHistoryRecord};
pub use job::{Job, JobStatus, JobUpdate, NewJob, SourceRef, TransferResult};
pub use quota::QuotaState;
