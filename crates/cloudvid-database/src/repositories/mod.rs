//! PostgreSQL implementations of the store traits.

pub mod history;
pub mod job;
pub mod quota;

pub use history::PgHistoryStore;
pub use job::PgJobStore;
pub use quota::PgQuotaStore;

use cloudvid_core::error::{AppError, ErrorKind};

/// Map a sqlx error, turning unique violations into `Conflict`.
///
/// The only unique constraints written by transitions are the single-active
/// index and the history checksum, so a violation always means another
/// writer won.
pub(crate) fn map_db_error(context: &str, err: sqlx::Error) -> AppError {
    let unique_violation = matches!(
        &err,
        sqlx::Error::Database(db) if db.is_unique_violation()
    );
    if unique_violation {
        return AppError::with_source(
            ErrorKind::Conflict,
            format!("{context}: another transfer is already active"),
            err,
        );
    }
    AppError::with_source(ErrorKind::Database, format!("{context}: {err}"), err)
}
