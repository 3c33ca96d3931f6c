//! PostgreSQL upload budget state.

use async_trait::async_trait;
use sqlx::PgPool;

use cloudvid_core::result::AppResult;
use cloudvid_entity::quota::QuotaState;

use super::map_db_error;
use crate::store::QuotaStore;

/// Quota store backed by the `quota_state` table.
#[derive(Debug, Clone)]
pub struct PgQuotaStore {
    pool: PgPool,
}

impl PgQuotaStore {
    /// Create a new quota store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaStore for PgQuotaStore {
    async fn load(&self, scope: &str) -> AppResult<Option<QuotaState>> {
        sqlx::query_as::<_, QuotaState>("SELECT * FROM quota_state WHERE scope = $1")
            .bind(scope)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error("Failed to load quota state", e))
    }

    async fn save(&self, state: &QuotaState) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO quota_state (scope, window_start, consumed_units, budget_units) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (scope) DO UPDATE SET \
             window_start = EXCLUDED.window_start, \
             consumed_units = EXCLUDED.consumed_units, \
             budget_units = EXCLUDED.budget_units",
        )
        .bind(&state.scope)
        .bind(state.window_start)
        .bind(state.consumed_units)
        .bind(state.budget_units)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_error("Failed to save quota state", e))?;
        Ok(())
    }
}
