//! Completed-transfer history entities.

pub mod model;

pub use model::{HistoryRecord, NewHistoryRecord};
