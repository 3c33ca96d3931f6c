//! In-memory completed-transfer history.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use cloudvid_core::result::AppResult;
use cloudvid_entity::history::{HistoryRecord, NewHistoryRecord};

use crate::store::HistoryStore;

#[derive(Debug, Default)]
struct InnerState {
    next_id: i64,
    by_checksum: HashMap<String, HistoryRecord>,
}

/// In-memory history store keyed by checksum.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistoryStore {
    state: Arc<Mutex<InnerState>>,
}

impl MemoryHistoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn lookup(&self, checksum: &str) -> AppResult<Option<HistoryRecord>> {
        Ok(self.state.lock().await.by_checksum.get(checksum).cloned())
    }

    async fn record(&self, data: NewHistoryRecord) -> AppResult<HistoryRecord> {
        let mut state = self.state.lock().await;
        let id = match state.by_checksum.get(&data.source_checksum) {
            Some(existing) => existing.id,
            None => {
                state.next_id += 1;
                state.next_id
            }
        };

        let record = HistoryRecord {
            id,
            source_checksum: data.source_checksum,
            source_file_id: data.source_file_id,
            source_file_name: data.source_file_name,
            job_id: data.job_id,
            destination_id: data.destination_id,
            destination_url: data.destination_url,
            destination_revision_tag: data.destination_revision_tag,
            uploaded_at: data.uploaded_at,
        };
        state
            .by_checksum
            .insert(record.source_checksum.clone(), record.clone());
        Ok(record)
    }

    async fn list_recent(&self, limit: u32) -> AppResult<Vec<HistoryRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<HistoryRecord> = state.by_checksum.values().cloned().collect();
        records.sort_by(|a, b| (b.uploaded_at, b.id).cmp(&(a.uploaded_at, a.id)));
        records.truncate(limit as usize);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn record(checksum: &str, destination: &str, offset_minutes: i64) -> NewHistoryRecord {
        NewHistoryRecord {
            source_checksum: checksum.into(),
            source_file_id: format!("file-{checksum}"),
            source_file_name: "clip.mp4".into(),
            job_id: None,
            destination_id: destination.into(),
            destination_url: format!("https://videos.example/{destination}"),
            destination_revision_tag: "r1".into(),
            uploaded_at: Utc::now() + Duration::minutes(offset_minutes),
        }
    }

    #[tokio::test]
    async fn test_record_replaces_same_checksum() {
        let store = MemoryHistoryStore::new();
        let first = store.record(record("abc", "v1", 0)).await.unwrap();
        let second = store.record(record("abc", "v2", 1)).await.unwrap();

        assert_eq!(first.id, second.id);
        let found = store.lookup("abc").await.unwrap().unwrap();
        assert_eq!(found.destination_id, "v2");
        assert!(store.lookup("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_recent_newest_first() {
        let store = MemoryHistoryStore::new();
        store.record(record("a", "v1", 0)).await.unwrap();
        store.record(record("b", "v2", 5)).await.unwrap();
        store.record(record("c", "v3", 2)).await.unwrap();

        let recent = store.list_recent(2).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|r| r.destination_id.as_str()).collect();
        assert_eq!(ids, vec!["v2", "v3"]);
    }
}
