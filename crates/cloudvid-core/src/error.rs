//! Unified application error types for CloudVid.
//!
//! All crates map their internal errors into [`AppError`] for consistent
//! propagation through the ? operator. Provider implementations report
//! failures with the [`ErrorKind`] that best describes them; the retry
//! policy in `cloudvid-worker` classifies purely on that kind.

use std::fmt;
use thiserror::Error;

/// Top-level error kind categorization used across the entire engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The requested resource was not found.
    NotFound,
    /// Input validation failed or an illegal state transition was requested.
    Validation,
    /// A compare-and-set lost a race or the record is in the wrong state.
    Conflict,
    /// A remote rate limit was hit (without the daily budget being exhausted).
    RateLimit,
    /// A network operation timed out.
    Timeout,
    /// A remote service returned a server-side (5xx-class) failure.
    ExternalService,
    /// The remote service is temporarily unavailable.
    ServiceUnavailable,
    /// Credentials expired and must be refreshed externally.
    AuthExpired,
    /// The platform's daily upload budget is exhausted.
    QuotaExceeded,
    /// The file exceeds the hard size ceiling.
    FileTooLarge,
    /// The destination copy does not match the source checksum.
    ChecksumMismatch,
    /// The source file no longer exists.
    SourceMissing,
    /// The destination rejected the upload metadata.
    InvalidMetadata,
    /// The operation was cancelled cooperatively.
    Cancelled,
    /// A database error occurred.
    Database,
    /// A local storage I/O error occurred.
    Storage,
    /// A configuration error occurred.
    Configuration,
    /// A serialization/deserialization error occurred.
    Serialization,
    /// An internal error occurred.
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable name, persisted alongside terminal failures.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::ExternalService => "external_service",
            Self::ServiceUnavailable => "service_unavailable",
            Self::AuthExpired => "auth_expired",
            Self::QuotaExceeded => "quota_exceeded",
            Self::FileTooLarge => "file_too_large",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::SourceMissing => "source_missing",
            Self::InvalidMetadata => "invalid_metadata",
            Self::Cancelled => "cancelled",
            Self::Database => "database",
            Self::Storage => "storage",
            Self::Configuration => "configuration",
            Self::Serialization => "serialization",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unified application error used throughout CloudVid.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    /// The category of error.
    pub kind: ErrorKind,
    /// A human-readable error message.
    pub message: String,
    /// Optional underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new application error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new application error with an underlying cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Create an external-service error.
    pub fn external(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalService, message)
    }

    /// Create an expired-credentials error.
    pub fn auth_expired(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthExpired, message)
    }

    /// Create a quota-exceeded error.
    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, message)
    }

    /// Create a file-too-large error.
    pub fn file_too_large(size: u64, max: u64) -> Self {
        const GIB: f64 = (1024u64 * 1024 * 1024) as f64;
        Self::new(
            ErrorKind::FileTooLarge,
            format!(
                "File size ({:.2}GB) exceeds maximum allowed ({:.1}GB)",
                size as f64 / GIB,
                max as f64 / GIB
            ),
        )
    }

    /// Create a checksum-mismatch error.
    pub fn checksum_mismatch(expected: &str, actual: &str) -> Self {
        Self::new(
            ErrorKind::ChecksumMismatch,
            format!("Checksum mismatch: expected {expected}, destination reported {actual}"),
        )
    }

    /// Create a source-missing error.
    pub fn source_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SourceMissing, message)
    }

    /// Create an invalid-metadata error.
    pub fn invalid_metadata(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidMetadata, message)
    }

    /// Create a cancellation error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Whether this error is a lost compare-and-set race.
    pub fn is_conflict(&self) -> bool {
        self.kind == ErrorKind::Conflict
    }
}

impl Clone for AppError {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            source: None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(
            ErrorKind::Serialization,
            format!("JSON serialization error: {err}"),
            err,
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            _ => ErrorKind::Storage,
        };
        Self::with_source(kind, format!("I/O error: {err}"), err)
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_source(
            ErrorKind::Configuration,
            format!("Configuration error: {err}"),
            err,
        )
    }
}
