//! Convenience result type alias for CloudVid.

use crate::error::AppError;

/// A specialized `Result` type for CloudVid operations.
pub type AppResult<T> = Result<T, AppError>;
