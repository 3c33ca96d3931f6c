//! # cloudvid-database
//!
//! Durable stores for the transfer engine. The [`store`] traits are the
//! persistence contract the worker depends on; [`repositories`] implements
//! them over PostgreSQL and [`memory`] implements them in process.

pub mod connection;
pub mod memory;
pub mod migration;
pub mod repositories;
pub mod store;

pub use connection::DatabasePool;
pub use store::{HistoryStore, JobStore, QueueSummary, QuotaStore};
