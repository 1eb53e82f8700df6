//! Durable download records.
//!
//! Each download is one record keyed by id. Writes carry the item's
//! `updated_at`; a write older than the stored record is discarded so a
//! late progress snapshot can never overwrite a status transition.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::item::{DownloadId, DownloadItem, DownloadStatus};

/// Durable projection of a [`DownloadItem`]. Speed and ETA are transient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: DownloadId,
    pub url: String,
    pub save_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    pub downloaded_bytes: u64,
    pub status: DownloadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&DownloadItem> for DownloadRecord {
    fn from(item: &DownloadItem) -> Self {
        Self {
            id: item.id,
            url: item.url.clone(),
            save_path: item.save_path.clone(),
            total_bytes: item.total_bytes,
            downloaded_bytes: item.downloaded_bytes,
            status: item.status,
            last_error: item.last_error.clone(),
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

impl From<DownloadRecord> for DownloadItem {
    fn from(record: DownloadRecord) -> Self {
        Self {
            id: record.id,
            url: record.url,
            save_path: record.save_path,
            total_bytes: record.total_bytes,
            downloaded_bytes: record.downloaded_bytes,
            speed_bytes_per_sec: 0,
            eta_seconds: None,
            status: record.status,
            last_error: record.last_error,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Written,
    /// The stored record is newer; nothing was written.
    Stale,
}

/// Durable key-value store of download records.
///
/// Upserts for the same id are serialized; upserts for different ids must
/// not block each other.
#[async_trait]
pub trait PersistenceStore: Send + Sync + 'static {
    /// Inserts or replaces a record unless the stored one is newer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the record cannot be made durable.
    async fn upsert(&self, record: &DownloadRecord) -> Result<UpsertOutcome>;

    /// Removes a record. Removing an unknown id succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the record exists but cannot be removed.
    async fn delete(&self, id: DownloadId) -> Result<()>;

    /// Returns every stored record ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the store cannot be enumerated.
    async fn list_all(&self) -> Result<Vec<DownloadRecord>>;
}

#[async_trait]
impl<T: PersistenceStore + ?Sized> PersistenceStore for Arc<T> {
    async fn upsert(&self, record: &DownloadRecord) -> Result<UpsertOutcome> {
        (**self).upsert(record).await
    }

    async fn delete(&self, id: DownloadId) -> Result<()> {
        (**self).delete(id).await
    }

    async fn list_all(&self) -> Result<Vec<DownloadRecord>> {
        (**self).list_all().await
    }
}

/// Stores each record as `<dir>/<id>.toml`, replaced atomically
/// (write tmp, fsync, rename).
#[derive(Debug)]
pub struct TomlStore {
    dir: PathBuf,
    locks: Mutex<HashMap<DownloadId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TomlStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file path for a record.
    #[must_use]
    pub fn record_path(&self, id: DownloadId) -> PathBuf {
        self.dir.join(format!("{id}.toml"))
    }

    fn lock_for(&self, id: DownloadId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }

    /// Drops the map's lock for `id` once `lock` is its only other holder.
    /// Handles are only cloned under the map mutex, so the count cannot grow
    /// while it is checked.
    fn release_lock(&self, id: DownloadId, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(lock) == 2 {
            locks.remove(&id);
        }
    }

    async fn read_record(path: &Path) -> Result<Option<DownloadRecord>> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(persistence_error(path, &e)),
        };
        match toml::from_str(&contents) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                log::warn!("Ignoring unreadable record {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    async fn upsert_locked(&self, record: &DownloadRecord) -> Result<UpsertOutcome> {
        let path = self.record_path(record.id);
        let existing = Self::read_record(&path).await?;
        if existing.is_some_and(|existing| existing.updated_at > record.updated_at) {
            log::debug!("Discarding stale write for download {}", record.id);
            return Ok(UpsertOutcome::Stale);
        }

        let toml_str = toml::to_string(record).map_err(|e| persistence_error(&path, &e))?;
        self.write_atomic(&path, &toml_str)
            .await
            .map_err(|e| persistence_error(&path, &e))?;
        Ok(UpsertOutcome::Written)
    }

    async fn write_atomic(&self, path: &Path, contents: &str) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;

        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp_path = path.with_extension("toml.tmp");

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, path).await?;

        // Make the rename itself durable.
        #[cfg(unix)]
        {
            tokio::fs::File::open(&self.dir).await?.sync_all().await?;
        }

        Ok(())
    }
}

fn persistence_error(path: &Path, err: &dyn std::fmt::Display) -> Error {
    Error::Persistence(format!("{}: {err}", path.display()))
}

#[async_trait]
impl PersistenceStore for TomlStore {
    async fn upsert(&self, record: &DownloadRecord) -> Result<UpsertOutcome> {
        let lock = self.lock_for(record.id);
        let result = {
            let _guard = lock.lock().await;
            self.upsert_locked(record).await
        };
        self.release_lock(record.id, &lock);
        result
    }

    async fn delete(&self, id: DownloadId) -> Result<()> {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            let path = self.record_path(id);
            crate::fs::remove_if_exists(&path)
                .await
                .map(|_| ())
                .map_err(|e| persistence_error(&path, &e))
        };
        self.release_lock(id, &lock);
        result
    }

    async fn list_all(&self) -> Result<Vec<DownloadRecord>> {
        let mut read_dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(persistence_error(&self.dir, &e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| persistence_error(&self.dir, &e))?
        {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "toml") {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => log::warn!("Skipping record {}: {e}", path.display()),
            }
        }

        records.sort_by_key(|r| r.id);
        Ok(records)
    }
}

/// In-process store with the same stale-write rule as [`TomlStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<DownloadId, DownloadRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored record for `id`.
    #[must_use]
    pub fn get(&self, id: DownloadId) -> Option<DownloadRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn upsert(&self, record: &DownloadRecord) -> Result<UpsertOutcome> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records
            .get(&record.id)
            .is_some_and(|existing| existing.updated_at > record.updated_at)
        {
            return Ok(UpsertOutcome::Stale);
        }
        records.insert(record.id, record.clone());
        Ok(UpsertOutcome::Written)
    }

    async fn delete(&self, id: DownloadId) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<DownloadRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Action;
    use tempfile::TempDir;

    fn record(id: u64) -> DownloadRecord {
        let item = DownloadItem::new(DownloadId(id), "https://example.com/f.zip", "/tmp/f.zip");
        DownloadRecord::from(&item)
    }

    #[test]
    fn record_round_trips_through_toml() {
        let mut item = DownloadItem::new(DownloadId(1), "https://example.com/f.zip", "/tmp/f.zip");
        item.total_bytes = Some(1000);
        item.downloaded_bytes = 250;
        item.speed_bytes_per_sec = 99;
        let rec = DownloadRecord::from(&item);

        let toml_str = toml::to_string(&rec).unwrap();
        assert!(!toml_str.contains("last_error"));
        let loaded: DownloadRecord = toml::from_str(&toml_str).unwrap();
        assert_eq!(loaded, rec);

        let restored = DownloadItem::from(loaded);
        assert_eq!(restored.downloaded_bytes, 250);
        assert_eq!(restored.speed_bytes_per_sec, 0);
    }

    #[tokio::test]
    async fn toml_store_upsert_and_list() {
        let dir = TempDir::new().unwrap();
        let store = TomlStore::new(dir.path().join("downloads"));

        assert!(store.list_all().await.unwrap().is_empty());

        store.upsert(&record(2)).await.unwrap();
        store.upsert(&record(1)).await.unwrap();

        let all = store.list_all().await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![DownloadId(1), DownloadId(2)]);
        assert!(store.record_path(DownloadId(1)).exists());
        assert!(!store.record_path(DownloadId(1)).with_extension("toml.tmp").exists());
    }

    #[tokio::test]
    async fn toml_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let rec = record(5);
        TomlStore::new(dir.path()).upsert(&rec).await.unwrap();

        let reopened = TomlStore::new(dir.path());
        assert_eq!(reopened.list_all().await.unwrap(), vec![rec]);
    }

    #[tokio::test]
    async fn toml_store_discards_stale_writes() {
        let dir = TempDir::new().unwrap();
        let store = TomlStore::new(dir.path());

        let mut item = DownloadItem::new(DownloadId(1), "https://example.com/f", "/tmp/f");
        item.apply(Action::Start).unwrap();
        let stale = DownloadRecord::from(&item);
        item.apply(Action::Pause).unwrap();
        let fresh = DownloadRecord::from(&item);

        assert_eq!(store.upsert(&fresh).await.unwrap(), UpsertOutcome::Written);
        assert_eq!(store.upsert(&stale).await.unwrap(), UpsertOutcome::Stale);

        let all = store.list_all().await.unwrap();
        assert_eq!(all[0].status, DownloadStatus::Paused);
    }

    #[tokio::test]
    async fn toml_store_skips_corrupt_and_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = TomlStore::new(dir.path());
        store.upsert(&record(1)).await.unwrap();

        std::fs::write(dir.path().join("2.toml"), "not = [valid").unwrap();
        std::fs::write(dir.path().join("3.toml.tmp"), "partial").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, DownloadId(1));
    }

    #[tokio::test]
    async fn toml_store_overwrites_corrupt_record() {
        let dir = TempDir::new().unwrap();
        let store = TomlStore::new(dir.path());
        std::fs::write(store.record_path(DownloadId(1)), "garbage [").unwrap();

        assert_eq!(store.upsert(&record(1)).await.unwrap(), UpsertOutcome::Written);
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn toml_store_delete() {
        let dir = TempDir::new().unwrap();
        let store = TomlStore::new(dir.path());
        store.upsert(&record(1)).await.unwrap();

        store.delete(DownloadId(1)).await.unwrap();
        assert!(store.list_all().await.unwrap().is_empty());

        // Unknown ids are fine.
        store.delete(DownloadId(42)).await.unwrap();
        assert!(store.locks.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn toml_store_same_id_keeps_newest_under_contention() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TomlStore::new(dir.path()));

        let mut item = DownloadItem::new(DownloadId(1), "https://example.com/f", "/tmp/f");
        item.apply(Action::Start).unwrap();
        item.downloaded_bytes = 10;
        let stale = DownloadRecord::from(&item);
        item.apply(Action::Pause).unwrap();
        let fresh = DownloadRecord::from(&item);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                let rec = if i % 2 == 0 { stale.clone() } else { fresh.clone() };
                tokio::spawn(async move { store.upsert(&rec).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.list_all().await.unwrap(), vec![fresh.clone()]);
        assert_eq!(store.upsert(&stale).await.unwrap(), UpsertOutcome::Stale);
        assert!(!store.record_path(DownloadId(1)).with_extension("toml.tmp").exists());
        assert!(store.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn toml_store_concurrent_ids() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TomlStore::new(dir.path()));

        let handles: Vec<_> = (1..=8)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.upsert(&record(i)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.list_all().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn memory_store_matches_toml_semantics() {
        let store = MemoryStore::new();

        let mut item = DownloadItem::new(DownloadId(1), "https://example.com/f", "/tmp/f");
        let older = DownloadRecord::from(&item);
        item.apply(Action::Start).unwrap();
        let newer = DownloadRecord::from(&item);

        assert_eq!(store.upsert(&newer).await.unwrap(), UpsertOutcome::Written);
        assert_eq!(store.upsert(&older).await.unwrap(), UpsertOutcome::Stale);
        assert_eq!(
            store.get(DownloadId(1)).map(|r| r.status),
            Some(DownloadStatus::Downloading)
        );

        store.delete(DownloadId(1)).await.unwrap();
        store.delete(DownloadId(1)).await.unwrap();
        assert!(store.list_all().await.unwrap().is_empty());
    }
}
