//! Snapshot creation, listing, restore and retention pruning.
//!
//! A snapshot is a single self-contained JSON file: metadata plus the full
//! serialized contents of every record store collection. The local copy is
//! authoritative; mirroring to the remote object store is best-effort and a
//! mirror failure degrades the operation instead of failing it. Restoring
//! always takes a `pre-restore` safety snapshot first.

pub mod remote;
pub mod scheduler;

pub use remote::{ObjectStore, S3ObjectStore};
pub use scheduler::spawn_backup_jobs;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::store::{RecordStore, StoreError};

/// Snapshot payload schema version, bumped on incompatible layout changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Default retention window for pruning, in days.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("snapshot '{0}' not found")]
    NotFound(String),

    #[error("snapshot '{name}' is corrupt: {reason}")]
    Corrupt { name: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("backup storage error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        BackupError::Io(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotKind {
    Nightly,
    Weekly,
    Manual,
    PreRestore,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Nightly => "nightly",
            SnapshotKind::Weekly => "weekly",
            SnapshotKind::Manual => "manual",
            SnapshotKind::PreRestore => "pre-restore",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "nightly" => Some(SnapshotKind::Nightly),
            "weekly" => Some(SnapshotKind::Weekly),
            "manual" => Some(SnapshotKind::Manual),
            "pre-restore" => Some(SnapshotKind::PreRestore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub timestamp: DateTime<Utc>,
    pub kind: SnapshotKind,
    pub schema_version: u32,
    pub collections: Vec<String>,
}

/// The full on-disk snapshot document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub metadata: SnapshotMetadata,
    pub payload: BTreeMap<String, serde_json::Value>,
}

/// A snapshot as it appears in listings.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub name: String,
    pub kind: SnapshotKind,
    pub created_at: DateTime<Utc>,
    pub local: bool,
    pub remote: bool,
}

/// Outcome of a restore.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub restored_collections: Vec<String>,
    pub pre_restore_snapshot: String,
}

/// Outcome of a prune pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub local_deleted: usize,
    pub remote_deleted: usize,
}

/// Parse `backup_<YYYYMMDD>_<HHMMSS>[_<n>]_<kind>.json` back into its parts.
fn parse_snapshot_name(name: &str) -> Option<(DateTime<Utc>, SnapshotKind)> {
    let stem = name.strip_prefix("backup_")?.strip_suffix(".json")?;
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 3 {
        return None;
    }
    let timestamp =
        NaiveDateTime::parse_from_str(&format!("{}_{}", parts[0], parts[1]), "%Y%m%d_%H%M%S")
            .ok()?;
    let kind = SnapshotKind::parse(parts.last()?)?;
    Some((timestamp.and_utc(), kind))
}

pub struct BackupEngine {
    store: Arc<RecordStore>,
    backup_dir: PathBuf,
    remote: Option<Arc<dyn ObjectStore>>,
}

impl BackupEngine {
    pub fn new(
        store: Arc<RecordStore>,
        backup_dir: PathBuf,
        remote: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self, BackupError> {
        std::fs::create_dir_all(&backup_dir)?;
        Ok(Self {
            store,
            backup_dir,
            remote,
        })
    }

    /// Snapshot the full record store. The local write is authoritative;
    /// mirror failure is logged as degraded, never fatal.
    pub async fn create_snapshot(&self, kind: SnapshotKind) -> Result<SnapshotInfo, BackupError> {
        let payload = self.store.snapshot_all().await?;
        let timestamp = Utc::now();
        let snapshot = SnapshotFile {
            metadata: SnapshotMetadata {
                timestamp,
                kind,
                schema_version: SCHEMA_VERSION,
                collections: payload.keys().cloned().collect(),
            },
            payload,
        };

        let name = self.unique_name(timestamp, kind).await;
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| BackupError::Io(e.to_string()))?;

        // Write-to-temp-then-rename: a crash mid-write never leaves a
        // half-written snapshot that could be listed or restored.
        let path = self.backup_dir.join(&name);
        let tmp = self.backup_dir.join(format!("{name}.tmp"));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        info!(
            snapshot = %name,
            kind = kind.as_str(),
            collections = snapshot.metadata.collections.len(),
            "Snapshot created"
        );

        let mut mirrored = false;
        if let Some(remote) = &self.remote {
            match remote.put(&name, bytes).await {
                Ok(()) => mirrored = true,
                Err(e) => {
                    warn!(snapshot = %name, error = %e, "Remote mirror failed, snapshot is local only");
                }
            }
        }

        Ok(SnapshotInfo {
            name,
            kind,
            created_at: timestamp,
            local: true,
            remote: mirrored,
        })
    }

    /// Snapshot filenames carry a second-resolution timestamp; disambiguate
    /// snapshots created within the same second.
    async fn unique_name(&self, timestamp: DateTime<Utc>, kind: SnapshotKind) -> String {
        let stamp = timestamp.format("%Y%m%d_%H%M%S");
        let base = format!("backup_{}_{}.json", stamp, kind.as_str());
        if !self.backup_dir.join(&base).exists() {
            return base;
        }
        let mut n = 1;
        loop {
            let name = format!("backup_{}_{}_{}.json", stamp, n, kind.as_str());
            if !self.backup_dir.join(&name).exists() {
                return name;
            }
            n += 1;
        }
    }

    /// Merge local and remote listings, de-duplicated by filename, newest
    /// first. A remote listing failure degrades to the local listing.
    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>, BackupError> {
        let mut snapshots: BTreeMap<String, SnapshotInfo> = BTreeMap::new();

        for name in self.local_names().await? {
            if let Some((created_at, kind)) = parse_snapshot_name(&name) {
                snapshots.insert(
                    name.clone(),
                    SnapshotInfo { name, kind, created_at, local: true, remote: false },
                );
            }
        }

        if let Some(remote) = &self.remote {
            match remote.list().await {
                Ok(names) => {
                    for name in names {
                        if let Some((created_at, kind)) = parse_snapshot_name(&name) {
                            snapshots
                                .entry(name.clone())
                                .and_modify(|s| s.remote = true)
                                .or_insert(SnapshotInfo {
                                    name,
                                    kind,
                                    created_at,
                                    local: false,
                                    remote: true,
                                });
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Remote listing failed, showing local snapshots only"),
            }
        }

        let mut list: Vec<SnapshotInfo> = snapshots.into_values().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    /// Restore a snapshot by filename.
    ///
    /// The document is validated before anything else happens; a corrupt
    /// snapshot aborts the restore with no collection touched. A `pre-restore`
    /// safety snapshot of the current state is then taken, and finally every
    /// collection listed in the payload is replaced (others are left alone).
    pub async fn restore(&self, name: &str) -> Result<RestoreOutcome, BackupError> {
        let bytes = self.load_snapshot_bytes(name).await?;

        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| BackupError::Corrupt {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        if value.get("metadata").map_or(true, |m| !m.is_object())
            || value.get("payload").map_or(true, |p| !p.is_object())
        {
            return Err(BackupError::Corrupt {
                name: name.to_string(),
                reason: "missing metadata or payload section".to_string(),
            });
        }
        let snapshot: SnapshotFile =
            serde_json::from_value(value).map_err(|e| BackupError::Corrupt {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let safety = self.create_snapshot(SnapshotKind::PreRestore).await?;
        self.store.restore_all(&snapshot.payload).await?;

        let restored: Vec<String> = snapshot.payload.keys().cloned().collect();
        info!(
            snapshot = %name,
            pre_restore = %safety.name,
            collections = restored.len(),
            "Snapshot restored"
        );
        Ok(RestoreOutcome {
            restored_collections: restored,
            pre_restore_snapshot: safety.name,
        })
    }

    async fn load_snapshot_bytes(&self, name: &str) -> Result<Vec<u8>, BackupError> {
        let path = self.backup_dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let Some(remote) = &self.remote else {
                    return Err(BackupError::NotFound(name.to_string()));
                };
                match remote.get(name).await {
                    Ok(Some(bytes)) => Ok(bytes),
                    Ok(None) => Err(BackupError::NotFound(name.to_string())),
                    // A failing mirror is not the same as a missing snapshot.
                    Err(e) => Err(BackupError::Io(e.to_string())),
                }
            }
            Err(e) => Err(BackupError::Io(e.to_string())),
        }
    }

    /// Delete snapshots older than the retention window, locally and
    /// remotely. The two passes are independent; either side's failure is
    /// logged without affecting the other.
    pub async fn prune(&self, retention_days: u32) -> Result<PruneReport, BackupError> {
        let cutoff = Utc::now() - Duration::days(retention_days as i64);
        let mut report = PruneReport::default();

        match self.local_names().await {
            Ok(names) => {
                for name in names {
                    let Some((created_at, _)) = parse_snapshot_name(&name) else {
                        continue;
                    };
                    if created_at < cutoff {
                        match tokio::fs::remove_file(self.backup_dir.join(&name)).await {
                            Ok(()) => report.local_deleted += 1,
                            Err(e) => warn!(snapshot = %name, error = %e, "Failed to delete local snapshot"),
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "Local prune pass failed"),
        }

        if let Some(remote) = &self.remote {
            match remote.list().await {
                Ok(names) => {
                    for name in names {
                        let Some((created_at, _)) = parse_snapshot_name(&name) else {
                            continue;
                        };
                        if created_at < cutoff {
                            match remote.delete(&name).await {
                                Ok(()) => report.remote_deleted += 1,
                                Err(e) => warn!(snapshot = %name, error = %e, "Failed to delete remote snapshot"),
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Remote prune pass failed"),
            }
        }

        if report.local_deleted > 0 || report.remote_deleted > 0 {
            info!(
                local = report.local_deleted,
                remote = report.remote_deleted,
                retention_days = retention_days,
                "Pruned aged snapshots"
            );
        }
        Ok(report)
    }

    async fn local_names(&self) -> Result<Vec<String>, BackupError> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.backup_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with("backup_") && name.ends_with(".json") {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use dashmap::DashMap;

    /// In-memory object store used to exercise the mirror path.
    #[derive(Default)]
    struct MemoryStore {
        objects: DashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn put(&self, key: &str, bytes: Vec<u8>) -> anyhow::Result<()> {
            self.objects.insert(key.to_string(), bytes);
            Ok(())
        }
        async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(self.objects.get(key).map(|v| v.clone()))
        }
        async fn list(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.objects.iter().map(|e| e.key().clone()).collect())
        }
        async fn delete(&self, key: &str) -> anyhow::Result<()> {
            self.objects.remove(key);
            Ok(())
        }
        async fn ensure_bucket(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Object store whose every operation fails.
    struct BrokenStore;

    #[async_trait]
    impl ObjectStore for BrokenStore {
        async fn put(&self, _key: &str, _bytes: Vec<u8>) -> anyhow::Result<()> {
            Err(anyhow!("mirror offline"))
        }
        async fn get(&self, _key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            Err(anyhow!("mirror offline"))
        }
        async fn list(&self) -> anyhow::Result<Vec<String>> {
            Err(anyhow!("mirror offline"))
        }
        async fn delete(&self, _key: &str) -> anyhow::Result<()> {
            Err(anyhow!("mirror offline"))
        }
        async fn ensure_bucket(&self) -> anyhow::Result<()> {
            Err(anyhow!("mirror offline"))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<RecordStore>,
        engine: BackupEngine,
    }

    fn fixture(remote: Option<Arc<dyn ObjectStore>>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::open(&dir.path().join("data")).unwrap());
        let engine =
            BackupEngine::new(store.clone(), dir.path().join("backups"), remote).unwrap();
        Fixture { _dir: dir, store, engine }
    }

    async fn seed(store: &RecordStore) {
        store
            .write("users", &[serde_json::json!({ "id": "u1", "name": "Bob" })])
            .await
            .unwrap();
        store
            .write("visits", &[serde_json::json!({ "id": "v1", "stage": "request" })])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn snapshot_then_restore_round_trips() {
        let f = fixture(None);
        seed(&f.store).await;

        let info = f.engine.create_snapshot(SnapshotKind::Manual).await.unwrap();
        assert!(info.local);
        assert!(!info.remote);

        // Mutate both collections, then restore.
        f.store.write::<serde_json::Value>("users", &[]).await.unwrap();
        f.store.write::<serde_json::Value>("visits", &[]).await.unwrap();
        let outcome = f.engine.restore(&info.name).await.unwrap();
        assert!(outcome.restored_collections.contains(&"users".to_string()));

        let users: Vec<serde_json::Value> = f.store.read("users").await.unwrap();
        assert_eq!(users[0]["name"], "Bob");
    }

    #[tokio::test]
    async fn restore_takes_a_pre_restore_snapshot_of_prior_state() {
        let f = fixture(None);
        seed(&f.store).await;
        let info = f.engine.create_snapshot(SnapshotKind::Manual).await.unwrap();

        // State at restore time differs from the snapshot.
        f.store
            .write("users", &[serde_json::json!({ "id": "u2", "name": "Eve" })])
            .await
            .unwrap();

        let outcome = f.engine.restore(&info.name).await.unwrap();

        let list = f.engine.list_snapshots().await.unwrap();
        let safety = list
            .iter()
            .find(|s| s.name == outcome.pre_restore_snapshot)
            .expect("pre-restore snapshot should be listed");
        assert_eq!(safety.kind, SnapshotKind::PreRestore);

        // The safety snapshot captured the pre-restore contents.
        let restored = f.engine.restore(&safety.name).await.unwrap();
        assert!(restored.restored_collections.contains(&"users".to_string()));
        let users: Vec<serde_json::Value> = f.store.read("users").await.unwrap();
        assert_eq!(users[0]["name"], "Eve");
    }

    #[tokio::test]
    async fn corrupt_snapshot_aborts_before_touching_collections() {
        let f = fixture(None);
        seed(&f.store).await;

        let name = "backup_20250101_120000_manual.json";
        std::fs::write(
            f.engine.backup_dir.join(name),
            serde_json::to_vec(&serde_json::json!({ "payload": {} })).unwrap(),
        )
        .unwrap();

        let err = f.engine.restore(name).await.unwrap_err();
        assert!(matches!(err, BackupError::Corrupt { .. }));

        // Nothing was replaced and no pre-restore snapshot was taken.
        let users: Vec<serde_json::Value> = f.store.read("users").await.unwrap();
        assert_eq!(users.len(), 1);
        assert!(f
            .engine
            .list_snapshots()
            .await
            .unwrap()
            .iter()
            .all(|s| s.kind != SnapshotKind::PreRestore));
    }

    #[tokio::test]
    async fn unknown_snapshot_is_not_found() {
        let f = fixture(None);
        let err = f.engine.restore("backup_20250101_120000_manual.json").await.unwrap_err();
        assert!(matches!(err, BackupError::NotFound(_)));
    }

    #[tokio::test]
    async fn snapshot_missing_on_both_sides_is_not_found() {
        let f = fixture(Some(Arc::new(MemoryStore::default())));
        let err = f.engine.restore("backup_20250101_120000_manual.json").await.unwrap_err();
        assert!(matches!(err, BackupError::NotFound(_)));
    }

    #[tokio::test]
    async fn failing_mirror_fetch_is_reported_as_io_not_missing() {
        let f = fixture(Some(Arc::new(BrokenStore)));
        let err = f.engine.restore("backup_20250101_120000_manual.json").await.unwrap_err();
        assert!(matches!(err, BackupError::Io(_)));
    }

    #[tokio::test]
    async fn prune_zero_retention_deletes_everything_local() {
        let f = fixture(None);
        seed(&f.store).await;
        for _ in 0..3 {
            f.engine.create_snapshot(SnapshotKind::Manual).await.unwrap();
        }
        assert_eq!(f.engine.list_snapshots().await.unwrap().len(), 3);

        let report = f.engine.prune(0).await.unwrap();
        assert_eq!(report.local_deleted, 3);
        assert!(f.engine.list_snapshots().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recent_snapshots_survive_pruning() {
        let f = fixture(None);
        seed(&f.store).await;
        f.engine.create_snapshot(SnapshotKind::Nightly).await.unwrap();

        let report = f.engine.prune(DEFAULT_RETENTION_DAYS).await.unwrap();
        assert_eq!(report.local_deleted, 0);
        assert_eq!(f.engine.list_snapshots().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn snapshots_are_mirrored_and_listings_merge() {
        let memory = Arc::new(MemoryStore::default());
        let f = fixture(Some(memory.clone()));
        seed(&f.store).await;

        let info = f.engine.create_snapshot(SnapshotKind::Manual).await.unwrap();
        assert!(info.remote);
        assert_eq!(memory.objects.len(), 1);

        // Remove the local copy; the listing still shows it as remote-only.
        std::fs::remove_file(f.engine.backup_dir.join(&info.name)).unwrap();
        let list = f.engine.list_snapshots().await.unwrap();
        assert_eq!(list.len(), 1);
        assert!(!list[0].local);
        assert!(list[0].remote);

        // And it can still be restored from the mirror.
        f.store.write::<serde_json::Value>("users", &[]).await.unwrap();
        f.engine.restore(&info.name).await.unwrap();
        let users: Vec<serde_json::Value> = f.store.read("users").await.unwrap();
        assert_eq!(users.len(), 1);
    }

    #[tokio::test]
    async fn mirror_failure_degrades_instead_of_failing() {
        let f = fixture(Some(Arc::new(BrokenStore)));
        seed(&f.store).await;

        let info = f.engine.create_snapshot(SnapshotKind::Nightly).await.unwrap();
        assert!(info.local);
        assert!(!info.remote);

        // Listing and pruning tolerate the broken mirror too.
        assert_eq!(f.engine.list_snapshots().await.unwrap().len(), 1);
        let report = f.engine.prune(0).await.unwrap();
        assert_eq!(report.local_deleted, 1);
        assert_eq!(report.remote_deleted, 0);
    }

    #[test]
    fn snapshot_names_parse_including_disambiguated_ones() {
        let (ts, kind) = parse_snapshot_name("backup_20260830_153000_manual.json").unwrap();
        assert_eq!(kind, SnapshotKind::Manual);
        assert_eq!(ts.format("%Y%m%d").to_string(), "20260830");

        let (_, kind) = parse_snapshot_name("backup_20260830_153000_2_pre-restore.json").unwrap();
        assert_eq!(kind, SnapshotKind::PreRestore);

        assert!(parse_snapshot_name("notes.txt").is_none());
        assert!(parse_snapshot_name("backup_garbage.json").is_none());
    }
}
