//! File size admission policy.

use cloudvid_core::config::TransferConfig;
use cloudvid_core::error::AppError;
use cloudvid_core::result::AppResult;

const GIB: f64 = (1024u64 * 1024 * 1024) as f64;

/// Hard ceiling plus a softer warning threshold on declared file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizePolicy {
    /// Files above this are rejected.
    pub max_bytes: u64,
    /// Files above this are accepted with a warning.
    pub warn_bytes: u64,
}

impl SizePolicy {
    /// Create a policy from explicit limits.
    pub fn new(max_bytes: u64, warn_bytes: u64) -> Self {
        Self {
            max_bytes,
            warn_bytes,
        }
    }

    /// Create a policy from the transfer configuration.
    pub fn from_config(config: &TransferConfig) -> Self {
        Self::new(config.max_file_size_bytes, config.warn_file_size_bytes)
    }

    /// Check a declared size.
    ///
    /// Returns `FileTooLarge` above the ceiling, and a warning note to add to
    /// the job message above the warning threshold.
    pub fn check(&self, size: u64) -> AppResult<Option<String>> {
        if size > self.max_bytes {
            return Err(AppError::file_too_large(size, self.max_bytes));
        }
        if size > self.warn_bytes {
            return Ok(Some(format!(
                "Large file ({:.2}GB), upload may take a long time",
                size as f64 / GIB
            )));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudvid_core::error::ErrorKind;

    #[test]
    fn test_thresholds() {
        let policy = SizePolicy::new(1000, 500);
        assert_eq!(policy.check(500).unwrap(), None);
        assert!(policy.check(501).unwrap().is_some());
        assert!(policy.check(1000).unwrap().is_some());
        assert_eq!(policy.check(1001).unwrap_err().kind, ErrorKind::FileTooLarge);
    }
}
