//! In-memory upload budget state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use cloudvid_core::result::AppResult;
use cloudvid_entity::quota::QuotaState;

use crate::store::QuotaStore;

/// In-memory quota store keyed by scope.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuotaStore {
    states: Arc<Mutex<HashMap<String, QuotaState>>>,
}

impl MemoryQuotaStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn load(&self, scope: &str) -> AppResult<Option<QuotaState>> {
        Ok(self.states.lock().await.get(scope).cloned())
    }

    async fn save(&self, state: &QuotaState) -> AppResult<()> {
        self.states
            .lock()
            .await
            .insert(state.scope.clone(), state.clone());
        Ok(())
    }
}
