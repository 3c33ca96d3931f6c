//! Transfer pipeline configuration.

use serde::{Deserialize, Serialize};

/// Upload chunks must be multiples of this granularity (resumable upload
/// endpoints reject anything else except for the final chunk).
pub const CHUNK_GRANULARITY: u64 = 256 * 1024;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Transfer pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Size of each streamed chunk in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: u64,
    /// Hard ceiling: larger files are rejected before any network I/O.
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    /// Files above this size are accepted but flagged in the job message.
    #[serde(default = "default_warn_file_size")]
    pub warn_file_size_bytes: u64,
    /// Directory holding partially downloaded spool files.
    #[serde(default = "default_spool_dir")]
    pub spool_dir: String,
    /// Root directory served by the bundled local source provider.
    #[serde(default = "default_source_root")]
    pub source_root: String,
    /// Root directory written by the bundled local destination provider.
    #[serde(default = "default_destination_root")]
    pub destination_root: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size(),
            max_file_size_bytes: default_max_file_size(),
            warn_file_size_bytes: default_warn_file_size(),
            spool_dir: default_spool_dir(),
            source_root: default_source_root(),
            destination_root: default_destination_root(),
        }
    }
}

fn default_chunk_size() -> u64 {
    8 * MIB
}

fn default_max_file_size() -> u64 {
    256 * GIB
}

fn default_warn_file_size() -> u64 {
    128 * GIB
}

fn default_spool_dir() -> String {
    "data/spool".to_string()
}

fn default_source_root() -> String {
    "data/source".to_string()
}

fn default_destination_root() -> String {
    "data/destination".to_string()
}
