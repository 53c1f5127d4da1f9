//! In-memory result store
//!
//! Volatile, bounded table. Each write stamps the record with a sequence
//! number standing in for a modification time; eviction drops the lowest.

use async_trait::async_trait;
use barrage_core::domain::result::RunResult;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::{ResultStore, StoreError};

pub struct MemoryResultStore {
    max_records: usize,
    inner: RwLock<Table>,
}

#[derive(Default)]
struct Table {
    next_seq: u64,
    records: HashMap<Uuid, (u64, RunResult)>,
}

impl MemoryResultStore {
    pub fn new(max_records: usize) -> Self {
        Self {
            max_records,
            inner: RwLock::new(Table::default()),
        }
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put(&self, result: RunResult) -> Result<(), StoreError> {
        let mut table = self.inner.write().await;

        let seq = table.next_seq;
        table.next_seq += 1;
        debug!("Stored result for run {}", result.run_id);
        table.records.insert(result.run_id, (seq, result));

        let excess = table.records.len().saturating_sub(self.max_records);
        if excess > 0 {
            let mut by_age: Vec<(u64, Uuid)> = table
                .records
                .iter()
                .map(|(id, (seq, _))| (*seq, *id))
                .collect();
            by_age.sort_unstable();

            for (_, id) in by_age.into_iter().take(excess) {
                table.records.remove(&id);
            }
            info!("Evicted {} result(s) beyond retention limit", excess);
        }

        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Option<RunResult> {
        let table = self.inner.read().await;
        table.records.get(&run_id).map(|(_, result)| result.clone())
    }

    async fn list_all(&self) -> Vec<RunResult> {
        let table = self.inner.read().await;
        table
            .records
            .values()
            .map(|(_, result)| result.clone())
            .collect()
    }

    async fn delete(&self, run_id: Uuid) -> Result<bool, StoreError> {
        let mut table = self.inner.write().await;
        Ok(table.records.remove(&run_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::testing::result;

    #[tokio::test]
    async fn test_never_exceeds_max_records() {
        let store = MemoryResultStore::new(3);
        let records: Vec<_> = (0..5).map(|i| result(None, i * 1_000)).collect();

        for record in &records {
            store.put(record.clone()).await.unwrap();
            assert!(store.list_all().await.len() <= 3);
        }

        assert!(store.get(records[0].run_id).await.is_none());
        assert!(store.get(records[1].run_id).await.is_none());
        for record in &records[2..] {
            assert!(store.get(record.run_id).await.is_some());
        }
    }

    #[tokio::test]
    async fn test_rewrite_refreshes_age() {
        let store = MemoryResultStore::new(2);
        let first = result(None, 1_000);
        let second = result(None, 2_000);

        store.put(first.clone()).await.unwrap();
        store.put(second.clone()).await.unwrap();
        store.put(first.clone()).await.unwrap();
        store.put(result(None, 3_000)).await.unwrap();

        assert!(store.get(first.run_id).await.is_some());
        assert!(store.get(second.run_id).await.is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryResultStore::new(10);
        let record = result(Some("s"), 1_000);
        store.put(record.clone()).await.unwrap();

        assert!(store.delete(record.run_id).await.unwrap());
        assert!(!store.delete(record.run_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_by_script_sorted_newest_first() {
        let store = MemoryResultStore::new(10);
        for started in [2_000, 3_000, 1_000] {
            store.put(result(Some("s"), started)).await.unwrap();
        }
        store.put(result(Some("other"), 9_000)).await.unwrap();

        let starts: Vec<i64> = store
            .list_by_script("s")
            .await
            .iter()
            .map(|r| r.started_at.timestamp_millis())
            .collect();
        assert_eq!(starts, vec![3_000, 2_000, 1_000]);
    }
}
