//! In-process store implementations.
//!
//! Suitable for single-node deployments and tests. State lives behind a
//! Tokio mutex and is lost when the process exits.

pub mod history;
pub mod job;
pub mod quota;

pub use history::MemoryHistoryStore;
pub use job::MemoryJobStore;
pub use quota::MemoryQuotaStore;
