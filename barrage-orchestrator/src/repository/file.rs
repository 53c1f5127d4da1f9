//! File-backed result store
//!
//! One JSON document per run, named `<run_id>.json`. Listing scans the
//! directory; retention ranks files by modification time.

use async_trait::async_trait;
use barrage_core::domain::result::RunResult;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ResultStore, StoreError};

const RECORD_EXTENSION: &str = "json";

pub struct FileResultStore {
    dir: PathBuf,
    max_records: usize,
}

impl FileResultStore {
    /// Opens a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl Into<PathBuf>, max_records: usize) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        info!(
            "File result store at {} (max {} records)",
            dir.display(),
            max_records
        );

        Ok(Self { dir, max_records })
    }

    fn record_path(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.{}", run_id, RECORD_EXTENSION))
    }

    /// Paths of all record files with their modification time
    async fn scan(&self) -> std::io::Result<Vec<(PathBuf, SystemTime)>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut records = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }

            match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => records.push((path, modified)),
                Err(e) => warn!("Skipping {}: cannot read metadata: {}", path.display(), e),
            }
        }

        Ok(records)
    }

    /// Deletes every record beyond `max_records`, oldest modification first
    ///
    /// `keep` is never evicted so a fresh write always survives.
    async fn enforce_retention(&self, keep: &Path) -> Result<usize, StoreError> {
        let mut records = self.scan().await?;
        if records.len() <= self.max_records {
            return Ok(0);
        }

        records.sort_by(|(path_a, time_a), (path_b, time_b)| {
            (path_b == keep)
                .cmp(&(path_a == keep))
                .then_with(|| time_b.cmp(time_a))
        });

        let mut evicted = 0;
        for (path, _) in records.iter().skip(self.max_records) {
            match tokio::fs::remove_file(path).await {
                Ok(()) => evicted += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to evict {}: {}", path.display(), e),
            }
        }

        if evicted > 0 {
            info!("Evicted {} result(s) beyond retention limit", evicted);
        }

        Ok(evicted)
    }
}

async fn read_record(path: &Path) -> Option<RunResult> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read result {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_slice(&raw) {
        Ok(result) => Some(result),
        Err(e) => {
            warn!("Skipping corrupt result {}: {}", path.display(), e);
            None
        }
    }
}

#[async_trait]
impl ResultStore for FileResultStore {
    async fn put(&self, result: RunResult) -> Result<(), StoreError> {
        let path = self.record_path(result.run_id);
        let staging = path.with_extension("tmp");
        let body = serde_json::to_vec_pretty(&result)?;

        tokio::fs::write(&staging, body).await?;
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            if let Err(cleanup) = tokio::fs::remove_file(&staging).await {
                warn!("Failed to remove {}: {}", staging.display(), cleanup);
            }
            return Err(e.into());
        }

        debug!("Stored result for run {}", result.run_id);

        // The record is durable at this point; retention is best-effort
        if let Err(e) = self.enforce_retention(&path).await {
            warn!("Retention pass in {} failed: {}", self.dir.display(), e);
        }
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Option<RunResult> {
        read_record(&self.record_path(run_id)).await
    }

    async fn list_all(&self) -> Vec<RunResult> {
        let records = match self.scan().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to scan results in {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(records.len());
        for (path, _) in records {
            if let Some(result) = read_record(&path).await {
                results.push(result);
            }
        }
        results
    }

    async fn delete(&self, run_id: Uuid) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(self.record_path(run_id)).await {
            Ok(()) => {
                debug!("Deleted result for run {}", run_id);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::testing::result;
    use std::time::Duration;

    fn age(path: &Path, secs: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs))
            .unwrap();
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::open(dir.path(), 10).await.unwrap();
        let record = result(Some("script-a"), 1_000);

        store.put(record.clone()).await.unwrap();
        assert_eq!(store.get(record.run_id).await, Some(record.clone()));

        assert!(store.delete(record.run_id).await.unwrap());
        assert!(!store.delete(record.run_id).await.unwrap());
        assert!(store.get(record.run_id).await.is_none());
    }

    #[tokio::test]
    async fn test_retention_evicts_least_recently_modified() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::open(dir.path(), 2).await.unwrap();

        let oldest = result(None, 1_000);
        let middle = result(None, 2_000);
        let newest = result(None, 3_000);

        store.put(oldest.clone()).await.unwrap();
        age(&store.record_path(oldest.run_id), 30);
        store.put(middle.clone()).await.unwrap();
        age(&store.record_path(middle.run_id), 20);
        store.put(newest.clone()).await.unwrap();

        let remaining = store.list_all().await;
        assert_eq!(remaining.len(), 2);
        assert!(store.get(oldest.run_id).await.is_none());
        assert!(store.get(middle.run_id).await.is_some());
        assert!(store.get(newest.run_id).await.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::open(dir.path(), 10).await.unwrap();
        let record = result(None, 1_000);
        store.put(record.clone()).await.unwrap();

        let corrupt_id = Uuid::new_v4();
        std::fs::write(store.record_path(corrupt_id), b"{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let listed = store.list_all().await;
        assert_eq!(listed, vec![record]);
        assert!(store.get(corrupt_id).await.is_none());
    }

    #[tokio::test]
    async fn test_prune_script_history_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::open(dir.path(), 100).await.unwrap();

        for started in [1_000, 4_000, 2_000, 3_000] {
            store.put(result(Some("checkout"), started)).await.unwrap();
        }
        store.put(result(Some("login"), 500)).await.unwrap();

        let pruned = store.prune_script_history("checkout", 2).await.unwrap();
        assert_eq!(pruned, 2);

        let history = store.list_by_script("checkout").await;
        let starts: Vec<i64> = history
            .iter()
            .map(|r| r.started_at.timestamp_millis())
            .collect();
        assert_eq!(starts, vec![4_000, 3_000]);
        assert_eq!(store.list_by_script("login").await.len(), 1);

        assert_eq!(store.prune_script_history("login", 5).await.unwrap(), 0);
        assert_eq!(store.list_by_script("login").await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_rename_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::open(dir.path(), 10).await.unwrap();
        let record = result(None, 1_000);

        // A directory squatting on the record path makes the rename fail
        let target = store.record_path(record.run_id);
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("occupied"), b"x").unwrap();

        assert!(store.put(record.clone()).await.is_err());
        assert!(!target.with_extension("tmp").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unlistable_directory_does_not_fail_put() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::open(dir.path(), 1).await.unwrap();
        store.put(result(None, 1_000)).await.unwrap();

        // Writable and searchable but not readable: the retention scan fails
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o300)).unwrap();
        let record = result(None, 2_000);
        let outcome = store.put(record.clone()).await;
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700)).unwrap();

        assert!(outcome.is_ok());
        assert_eq!(store.get(record.run_id).await, Some(record));
    }
}
