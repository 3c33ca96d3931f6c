//! PostgreSQL pool used by the job, history and quota stores.

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use cloudvid_core::config::DatabaseConfig;
use cloudvid_core::error::{AppError, ErrorKind};
use cloudvid_core::result::AppResult;

/// Shared connection pool.
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Open the pool and make sure the server answers.
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        info!(
            url = %config.redacted_url(),
            max_connections = config.max_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(config.idle_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Database,
                    format!("Failed to connect to {}", config.redacted_url()),
                    e,
                )
            })?;

        let db = Self { pool };
        db.ping().await?;
        Ok(db)
    }

    /// Underlying sqlx pool, handed to the stores.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Database did not answer", e))?;
        Ok(())
    }

    /// Close all connections; in-flight queries finish first.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }
}
