//! File-backed record store.
//!
//! Each named collection is persisted as a single JSON array in
//! `<data_dir>/<collection>.json`. Writes always go to a temporary file first
//! and are renamed into place, so readers never observe a torn file. All
//! read-modify-write sequences run under a per-collection async mutex, which
//! serializes logical writers within the process (concurrent updates to the
//! same collection cannot lose each other's changes). First-access
//! materialization of a missing collection takes the same lock.
//!
//! Concurrent processes sharing a data directory are not supported.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Errors surfaced by the record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying medium could not be read or written. Distinct from a
    /// collection that simply does not exist yet (which yields the default).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A collection file exists but does not parse.
    #[error("collection '{collection}' is corrupt: {reason}")]
    Corrupt { collection: String, reason: String },

    /// A record id was not found during a pure update.
    #[error("record '{0}' not found")]
    NotFound(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

pub struct RecordStore {
    data_dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RecordStore {
    /// Open a store rooted at `data_dir`, creating the directory if needed.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        info!("Record store opened at {}", data_dir.display());
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            locks: DashMap::new(),
        })
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.data_dir.join(format!("{collection}.json"))
    }

    fn lock_handle(&self, collection: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(collection.to_string())
            .or_default()
            .clone()
    }

    /// Load a collection's records without materializing a missing file.
    /// `None` means the collection does not exist on disk yet.
    async fn load<T: DeserializeOwned>(
        &self,
        collection: &str,
    ) -> Result<Option<Vec<T>>, StoreError> {
        match tokio::fs::read(self.collection_path(collection)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    collection: collection.to_string(),
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Unavailable(e.to_string())),
        }
    }

    /// Read a collection's records. A missing file is not an error: the empty
    /// collection is materialized on disk and returned.
    pub async fn read<T: DeserializeOwned>(
        &self,
        collection: &str,
    ) -> Result<Vec<T>, StoreError> {
        if let Some(records) = self.load(collection).await? {
            return Ok(records);
        }

        // Materialize under the collection lock; an in-flight `update` may be
        // about to install its own contents, and first access must not
        // install `[]` over them.
        let lock = self.lock_handle(collection);
        let _guard = lock.lock().await;
        if let Some(records) = self.load(collection).await? {
            return Ok(records);
        }
        self.write_bytes(collection, b"[]").await?;
        Ok(Vec::new())
    }

    /// Replace a collection's entire contents.
    pub async fn write<T: Serialize>(
        &self,
        collection: &str,
        records: &[T],
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(records)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        self.write_bytes(collection, &bytes).await
    }

    /// Write-to-temp-then-rename so a crash mid-write leaves the previous
    /// file intact. The temp name is unique per write, so two in-flight
    /// writes can never stage through the same file.
    async fn write_bytes(&self, collection: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.collection_path(collection);
        let tmp = self
            .data_dir
            .join(format!("{collection}.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Run a read-modify-write sequence under the collection's write lock.
    ///
    /// The closure mutates the full record list; the result is written back
    /// before the lock is released.
    pub async fn update<T, R, E, F>(&self, collection: &str, f: F) -> Result<R, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<StoreError>,
        F: FnOnce(&mut Vec<T>) -> Result<R, E>,
    {
        let lock = self.lock_handle(collection);
        let _guard = lock.lock().await;

        // `load`, not `read`: the lock is already held and the write below
        // materializes the collection anyway.
        let mut records: Vec<T> = self.load(collection).await?.unwrap_or_default();
        let result = f(&mut records)?;
        self.write(collection, &records).await?;
        Ok(result)
    }

    /// Merge a JSON patch into the record with the given id. Patch fields
    /// overwrite; absent fields retain their prior value. Fails with
    /// `NotFound` if the id is absent (pure update, not create).
    pub async fn upsert(
        &self,
        collection: &str,
        id: &str,
        patch: serde_json::Value,
    ) -> Result<serde_json::Value, StoreError> {
        self.update(collection, |records: &mut Vec<serde_json::Value>| {
            let record = records
                .iter_mut()
                .find(|r| r.get("id").and_then(|v| v.as_str()) == Some(id))
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            if let (Some(target), Some(fields)) = (record.as_object_mut(), patch.as_object()) {
                for (key, value) in fields {
                    target.insert(key.clone(), value.clone());
                }
            }
            Ok(record.clone())
        })
        .await
    }

    /// Raw contents of every collection in the data directory, keyed by
    /// collection name.
    ///
    /// Each file is read independently; there is no cross-collection cut. In
    /// a single process with per-collection write locks the only possible
    /// skew is a write landing between two collection reads, which is
    /// accepted for this scope.
    pub async fn snapshot_all(
        &self,
    ) -> Result<BTreeMap<String, serde_json::Value>, StoreError> {
        let mut snapshot = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(&self.data_dir)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
        {
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let name = match path.file_stem().and_then(|s| s.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let bytes = tokio::fs::read(&path).await?;
            let value: serde_json::Value =
                serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                    collection: name.clone(),
                    reason: e.to_string(),
                })?;
            snapshot.insert(name, value);
        }
        Ok(snapshot)
    }

    /// Replace exactly the listed collections with the given contents.
    /// Collections not present in the map are left untouched.
    pub async fn restore_all(
        &self,
        collections: &BTreeMap<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        for (name, value) in collections {
            let lock = self.lock_handle(name);
            let _guard = lock.lock().await;
            let bytes = serde_json::to_vec_pretty(value)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            self.write_bytes(name, &bytes).await?;
        }
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Item {
        id: String,
        value: i64,
    }

    fn store() -> (tempfile::TempDir, RecordStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn missing_collection_returns_default_and_materializes() {
        let (dir, store) = store();
        let items: Vec<Item> = store.read("things").await.unwrap();
        assert!(items.is_empty());
        assert!(dir.path().join("things.json").exists());
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (_dir, store) = store();
        let items = vec![
            Item { id: "a".into(), value: 1 },
            Item { id: "b".into(), value: 2 },
        ];
        store.write("things", &items).await.unwrap();
        let back: Vec<Item> = store.read("things").await.unwrap();
        assert_eq!(back, items);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("things.json"), b"not json").unwrap();
        let err = store.read::<Item>("things").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn upsert_merges_patch_fields() {
        let (_dir, store) = store();
        let items = vec![Item { id: "a".into(), value: 1 }];
        store.write("things", &items).await.unwrap();

        store
            .upsert("things", "a", serde_json::json!({ "value": 9 }))
            .await
            .unwrap();

        let back: Vec<Item> = store.read("things").await.unwrap();
        assert_eq!(back[0].value, 9);
        assert_eq!(back[0].id, "a");
    }

    #[tokio::test]
    async fn upsert_unknown_id_is_not_found() {
        let (_dir, store) = store();
        store.write::<Item>("things", &[]).await.unwrap();
        let err = store
            .upsert("things", "missing", serde_json::json!({ "value": 1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_updates_do_not_lose_writes() {
        let (_dir, store) = store();
        let store = Arc::new(store);
        store
            .write("counters", &[Item { id: "c".into(), value: 0 }])
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update("counters", |items: &mut Vec<Item>| {
                        items[0].value += 1;
                        Ok::<_, StoreError>(())
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let back: Vec<Item> = store.read("counters").await.unwrap();
        assert_eq!(back[0].value, 20);
    }

    #[tokio::test]
    async fn first_access_read_does_not_clobber_concurrent_update() {
        let (_dir, store) = store();
        let store = Arc::new(store);

        // Race a first-touch read against an update on a collection that has
        // no file yet; the update's record must survive every interleaving.
        for i in 0..20 {
            let collection = format!("fresh{i}");

            let writer = {
                let store = store.clone();
                let collection = collection.clone();
                tokio::spawn(async move {
                    store
                        .update(&collection, |items: &mut Vec<Item>| {
                            items.push(Item { id: "w".into(), value: 1 });
                            Ok::<_, StoreError>(())
                        })
                        .await
                        .unwrap();
                })
            };
            let reader = {
                let store = store.clone();
                let collection = collection.clone();
                tokio::spawn(async move {
                    store.read::<Item>(&collection).await.unwrap();
                })
            };
            writer.await.unwrap();
            reader.await.unwrap();

            let back: Vec<Item> = store.read(&collection).await.unwrap();
            assert_eq!(back.len(), 1, "{collection} lost the concurrent write");
        }
    }

    #[tokio::test]
    async fn snapshot_and_restore_round_trip() {
        let (_dir, store) = store();
        store
            .write("a", &[Item { id: "1".into(), value: 1 }])
            .await
            .unwrap();
        store
            .write("b", &[Item { id: "2".into(), value: 2 }])
            .await
            .unwrap();

        let snapshot = store.snapshot_all().await.unwrap();
        assert_eq!(snapshot.len(), 2);

        // Mutate, then restore the snapshot.
        store
            .write("a", &[Item { id: "1".into(), value: 99 }])
            .await
            .unwrap();
        store.restore_all(&snapshot).await.unwrap();

        let a: Vec<Item> = store.read("a").await.unwrap();
        assert_eq!(a[0].value, 1);
    }

    #[tokio::test]
    async fn restore_leaves_unlisted_collections_untouched() {
        let (_dir, store) = store();
        store
            .write("kept", &[Item { id: "k".into(), value: 7 }])
            .await
            .unwrap();

        let mut partial = BTreeMap::new();
        partial.insert(
            "other".to_string(),
            serde_json::json!([{ "id": "o", "value": 3 }]),
        );
        store.restore_all(&partial).await.unwrap();

        let kept: Vec<Item> = store.read("kept").await.unwrap();
        assert_eq!(kept[0].value, 7);
        let other: Vec<Item> = store.read("other").await.unwrap();
        assert_eq!(other[0].value, 3);
    }
}
