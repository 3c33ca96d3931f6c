//! Transfer job domain entities.

pub mod model;
pub mod status;

pub use model::{Job, JobUpdate, NewJob, SourceRef, TransferResult};
pub use status::JobStatus;
