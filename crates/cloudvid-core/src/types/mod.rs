//! Core type definitions used across the CloudVid workspace.

pub mod id;
pub mod transfer;

pub use id::*;
pub use transfer::{ChunkAck, FileDescriptor, FinalizedUpload, PrivacyStatus, UploadMetadata};
