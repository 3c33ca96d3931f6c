//! Progress accounting across the download and upload legs.

use serde::{Deserialize, Serialize};

/// Highest progress reported before the destination confirms finalization.
pub const IN_FLIGHT_CEILING: f64 = 99.9;

/// Which leg of the transfer is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Source bytes are being spooled.
    Download,
    /// Spooled bytes are being sent to the destination.
    Upload,
}

/// Byte counters reported to the observer after each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    /// Current leg.
    pub stage: Stage,
    /// Bytes held in the spool.
    pub downloaded: u64,
    /// Bytes the destination acknowledged.
    pub uploaded: u64,
    /// Declared file size.
    pub total: u64,
}

impl StageProgress {
    /// Overall percentage; both legs count for half.
    ///
    /// Clamped to `[0, 99.9]`: only finalization reports 100.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let done = self.downloaded.min(self.total) + self.uploaded.min(self.total);
        let percent = done as f64 / (2 * self.total) as f64 * 100.0;
        percent.clamp(0.0, IN_FLIGHT_CEILING)
    }

    /// Status line for the job message.
    pub fn message(&self) -> String {
        match self.stage {
            Stage::Download => format!(
                "Downloading from source: {} / {} bytes",
                self.downloaded, self.total
            ),
            Stage::Upload => format!(
                "Uploading to destination: {} / {} bytes",
                self.uploaded, self.total
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(stage: Stage, downloaded: u64, uploaded: u64) -> StageProgress {
        StageProgress {
            stage,
            downloaded,
            uploaded,
            total: 1000,
        }
    }

    #[test]
    fn test_download_counts_half() {
        assert_eq!(at(Stage::Download, 0, 0).percent(), 0.0);
        assert_eq!(at(Stage::Download, 500, 0).percent(), 25.0);
        assert_eq!(at(Stage::Download, 1000, 0).percent(), 50.0);
    }

    #[test]
    fn test_upload_never_reaches_hundred() {
        assert_eq!(at(Stage::Upload, 1000, 500).percent(), 75.0);
        assert_eq!(at(Stage::Upload, 1000, 1000).percent(), IN_FLIGHT_CEILING);
    }

    #[test]
    fn test_monotonic_across_stage_boundary() {
        let end_of_download = at(Stage::Download, 1000, 0).percent();
        let start_of_upload = at(Stage::Upload, 1000, 0).percent();
        assert!(start_of_upload >= end_of_download);
    }

    #[test]
    fn test_empty_file() {
        let progress = StageProgress {
            stage: Stage::Upload,
            downloaded: 0,
            uploaded: 0,
            total: 0,
        };
        assert_eq!(progress.percent(), 0.0);
    }
}
