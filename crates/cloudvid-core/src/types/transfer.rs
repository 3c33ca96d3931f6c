//! Value types exchanged with source and destination providers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A file as reported by a source provider listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Provider-specific file identifier.
    pub file_id: String,
    /// Human-readable file name.
    pub name: String,
    /// Declared size in bytes.
    pub size_bytes: u64,
    /// Content checksum (hex), when the provider exposes one.
    pub checksum: Option<String>,
    /// MIME type, when known.
    pub mime_type: Option<String>,
    /// Last modification time, when known.
    pub modified_at: Option<DateTime<Utc>>,
}

/// Destination visibility level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyStatus {
    /// Visible to everyone.
    Public,
    /// Reachable by link only.
    Unlisted,
    /// Visible to the owner only.
    #[default]
    Private,
}

impl PrivacyStatus {
    /// Return the privacy level as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlisted => "unlisted",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for PrivacyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination-side metadata, already resolved from any template.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadMetadata {
    /// Title shown on the destination.
    pub title: String,
    /// Long-form description.
    #[serde(default)]
    pub description: String,
    /// Visibility level.
    #[serde(default)]
    pub privacy: PrivacyStatus,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Platform category identifier.
    #[serde(default)]
    pub category_id: Option<String>,
}

/// Acknowledgement for one chunk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAck {
    /// Whether these bytes were newly accepted (false for a replayed chunk).
    pub accepted: bool,
    /// The offset the destination expects next.
    pub next_expected_offset: u64,
}

/// Outcome of finalizing an upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedUpload {
    /// Destination identifier of the created item.
    pub destination_id: String,
    /// Public URL of the created item.
    pub url: String,
    /// Opaque revision tag used for later change detection.
    pub revision_tag: String,
    /// Checksum computed by the destination, when it reports one.
    pub checksum: Option<String>,
    /// Budget units the destination actually charged, when it reports them.
    pub units_consumed: Option<u32>,
}
