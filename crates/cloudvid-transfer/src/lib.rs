//! # cloudvid-transfer
//!
//! The transfer pipeline: moves one file from a [`SourceProvider`] to a
//! [`DestinationProvider`] through a local spool file, with both legs
//! resumable from a byte offset.
//!
//! [`SourceProvider`]: cloudvid_core::traits::SourceProvider
//! [`DestinationProvider`]: cloudvid_core::traits::DestinationProvider

pub mod checksum;
pub mod pipeline;
pub mod policy;
pub mod progress;
pub mod providers;
pub mod spool;

pub use pipeline::{Checkpoint, TransferObserver, TransferPipeline, TransferRequest};
pub use policy::SizePolicy;
pub use progress::{Stage, StageProgress};
pub use spool::Spool;
