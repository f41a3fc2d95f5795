use crate::def::*;
use crate::def::Record;
use crate::identity::IdentityResolver;
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// On-disk snapshot document: the full record set plus the observed
/// actor-name table, so the identity resolver can be reseeded next run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnapshotData {
    pub version: u32,
    #[serde(default)]
    pub records: Vec<Record>,
    #[serde(default)]
    pub actors: Vec<ActorName>,
}

impl SnapshotData {
    pub fn load_or_default(path: &Path) -> SyncResult<Self> {
        if !path.exists() {
            info!("no snapshot at {:?}, starting empty", path);
            return Ok(Self {
                version: SNAPSHOT_VERSION,
                ..Default::default()
            });
        }
        let file = std::fs::File::open(path).map_err(|e| {
            error!("failed to open snapshot {:?}: {}", path, e);
            SyncError::MergeIo(format!("open snapshot {:?}: {}", path, e))
        })?;
        let data: SnapshotData = serde_json::from_reader(file).map_err(|e| {
            error!("failed to parse snapshot {:?}: {}", path, e);
            SyncError::MergeIo(format!("parse snapshot {:?}: {}", path, e))
        })?;
        if data.version > SNAPSHOT_VERSION {
            return Err(SyncError::MergeIo(format!(
                "snapshot {:?} has unsupported version {}",
                path, data.version
            )));
        }
        info!(
            "loaded snapshot {:?}: {} records, {} actors",
            path,
            data.records.len(),
            data.actors.len()
        );
        Ok(data)
    }

    /// Max `occurred_at` per partition, used to seed the cursor store.
    pub fn high_water_marks(&self) -> HashMap<u64, i64> {
        let mut marks: HashMap<u64, i64> = HashMap::new();
        for record in &self.records {
            marks
                .entry(record.partition_id)
                .and_modify(|m| *m = (*m).max(record.occurred_at))
                .or_insert(record.occurred_at);
        }
        marks
    }
}

struct CacheState {
    records: BTreeMap<u64, Record>,
}

/// Owns the persisted cache. All merges serialize on the internal mutex, so
/// two partitions never race on the same snapshot write; persistence is a
/// whole-file atomic replace, so readers never see a half-written snapshot.
pub struct CacheStore {
    path: PathBuf,
    identity: Arc<Mutex<IdentityResolver>>,
    state: Mutex<CacheState>,
}

impl CacheStore {
    pub fn new(
        path: PathBuf,
        snapshot: SnapshotData,
        identity: Arc<Mutex<IdentityResolver>>,
    ) -> Self {
        let mut records = BTreeMap::new();
        for record in snapshot.records {
            if let Some(old) = records.insert(record.id, record) {
                warn!("duplicate record id {} in snapshot, keeping latest", old.id);
            }
        }
        Self {
            path,
            identity,
            state: Mutex::new(CacheState { records }),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn get(&self, id: u64) -> Option<Record> {
        self.state.lock().await.records.get(&id).cloned()
    }

    /// Records for one partition in ascending `occurred_at` order, with the
    /// actor display name resolved at read time so renames apply
    /// retroactively.
    pub async fn labeled_records(&self, partition_id: u64) -> Vec<(Record, String)> {
        let state = self.state.lock().await;
        let identity = self.identity.lock().await;
        let mut rows: Vec<(Record, String)> = state
            .records
            .values()
            .filter(|r| r.partition_id == partition_id)
            .map(|r| (r.clone(), identity.resolve(r.actor_id)))
            .collect();
        rows.sort_by_key(|(r, _)| r.occurred_at);
        rows
    }

    /// Merges one partition's freshly normalized batch into the snapshot and
    /// persists the whole snapshot atomically. An existing id is replaced
    /// (edits); a new id is inserted. An empty batch leaves the snapshot
    /// untouched and reports no high-water mark.
    pub async fn merge(
        &self,
        partition_id: u64,
        new_records: Vec<Record>,
    ) -> SyncResult<MergeResult> {
        let mut state = self.state.lock().await;

        if new_records.is_empty() {
            debug!("partition {}: empty batch, snapshot unchanged", partition_id);
            return Ok(MergeResult::default());
        }

        let mut result = MergeResult::default();
        for record in new_records {
            result.high_water_mark = Some(
                result
                    .high_water_mark
                    .map_or(record.occurred_at, |m| m.max(record.occurred_at)),
            );
            if state.records.insert(record.id, record).is_some() {
                result.updated += 1;
            } else {
                result.inserted += 1;
            }
        }

        let data = {
            let identity = self.identity.lock().await;
            SnapshotData {
                version: SNAPSHOT_VERSION,
                records: state.records.values().cloned().collect(),
                actors: identity.export(),
            }
        };
        self.persist(&data).await?;

        info!(
            "partition {}: merged {} inserted, {} updated, snapshot now {} records",
            partition_id,
            result.inserted,
            result.updated,
            state.records.len()
        );
        Ok(result)
    }

    /// Write-to-temp then rename. A crash mid-write leaves the previous
    /// snapshot intact.
    async fn persist(&self, data: &SnapshotData) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    SyncError::MergeIo(format!("create dir {:?}: {}", parent, e))
                })?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(data)
            .map_err(|e| SyncError::MergeIo(format!("encode snapshot: {}", e)))?;

        tokio::fs::write(&tmp_path, &bytes).await.map_err(|e| {
            error!("failed to write snapshot tmp {:?}: {}", tmp_path, e);
            SyncError::MergeIo(format!("write snapshot tmp {:?}: {}", tmp_path, e))
        })?;

        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            error!(
                "failed to swap snapshot {:?} -> {:?}: {}",
                tmp_path, self.path, e
            );
            SyncError::MergeIo(format!("swap snapshot {:?}: {}", self.path, e))
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use tempfile::tempdir;

    fn record(id: u64, partition_id: u64, occurred_at: i64) -> Record {
        Record {
            id,
            partition_id,
            actor_id: 100,
            occurred_at,
            edited_at: None,
            content_len: 5,
            attachments: 0,
            embeds: 0,
            reaction_count: 0,
            mention_ids: vec![],
            reply_to_id: None,
            reply_to_actor_id: None,
            thread_id: None,
            pinned: false,
        }
    }

    fn empty_identity() -> Arc<Mutex<IdentityResolver>> {
        Arc::new(Mutex::new(IdentityResolver::new(
            StdHashMap::new(),
            "Deleted User",
        )))
    }

    fn store_at(path: PathBuf) -> CacheStore {
        CacheStore::new(path, SnapshotData::default(), empty_identity())
    }

    #[tokio::test]
    async fn test_merge_inserts_and_reports_high_water_mark() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path().join(CACHE_FILENAME));

        let result = store
            .merge(1, vec![record(1, 1, 10), record(2, 1, 20), record(3, 1, 30)])
            .await
            .unwrap();
        assert_eq!(result.inserted, 3);
        assert_eq!(result.updated, 0);
        assert_eq!(result.high_water_mark, Some(30));
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path().join(CACHE_FILENAME));

        store.merge(1, vec![record(1, 1, 10)]).await.unwrap();
        let second = store.merge(1, vec![record(1, 1, 10)]).await.unwrap();

        // replayed batch replaces, never duplicates
        assert_eq!(store.len().await, 1);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 1);
        assert_eq!(second.high_water_mark, Some(10));
    }

    #[tokio::test]
    async fn test_merge_replaces_edited_record() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path().join(CACHE_FILENAME));

        store.merge(1, vec![record(1, 1, 10)]).await.unwrap();
        let mut edited = record(1, 1, 10);
        edited.edited_at = Some(15);
        edited.content_len = 9;
        store.merge(1, vec![edited.clone()]).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(1).await.unwrap(), edited);
    }

    #[tokio::test]
    async fn test_empty_batch_leaves_snapshot_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CACHE_FILENAME);
        let store = store_at(path.clone());

        store.merge(1, vec![record(1, 1, 10)]).await.unwrap();
        let before = std::fs::read(&path).unwrap();

        let result = store.merge(1, vec![]).await.unwrap();
        assert_eq!(result, MergeResult::default());
        assert_eq!(result.high_water_mark, None);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CACHE_FILENAME);

        let store = store_at(path.clone());
        store
            .merge(1, vec![record(1, 1, 10), record(2, 1, 25)])
            .await
            .unwrap();
        store.merge(2, vec![record(9, 2, 99)]).await.unwrap();
        drop(store);

        let snapshot = SnapshotData::load_or_default(&path).unwrap();
        assert_eq!(snapshot.records.len(), 3);
        let marks = snapshot.high_water_marks();
        assert_eq!(marks.get(&1), Some(&25));
        assert_eq!(marks.get(&2), Some(&99));

        let reloaded = CacheStore::new(path, snapshot, empty_identity());
        assert_eq!(reloaded.get(2).await.unwrap(), record(2, 1, 25));
    }

    #[tokio::test]
    async fn test_no_tmp_file_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CACHE_FILENAME);
        let store = store_at(path.clone());
        store.merge(1, vec![record(1, 1, 10)]).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_actor_table_persists_with_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CACHE_FILENAME);

        let identity = empty_identity();
        identity.lock().await.observe(100, "alice");
        let store = CacheStore::new(path.clone(), SnapshotData::default(), identity);
        store.merge(1, vec![record(1, 1, 10)]).await.unwrap();
        drop(store);

        let snapshot = SnapshotData::load_or_default(&path).unwrap();
        assert_eq!(snapshot.actors.len(), 1);
        assert_eq!(snapshot.actors[0].display_name, "alice");
    }

    #[tokio::test]
    async fn test_labeled_records_resolve_names_retroactively() {
        let dir = tempdir().unwrap();
        let identity = empty_identity();
        let store = CacheStore::new(
            dir.path().join(CACHE_FILENAME),
            SnapshotData::default(),
            identity.clone(),
        );
        store
            .merge(1, vec![record(1, 1, 20), record(2, 1, 10)])
            .await
            .unwrap();

        identity.lock().await.observe(100, "renamed");
        let rows = store.labeled_records(1).await;
        assert_eq!(rows.len(), 2);
        // ascending occurrence order, rename applied to historical rows
        assert_eq!(rows[0].0.id, 2);
        assert_eq!(rows[0].1, "renamed");
        assert_eq!(rows[1].1, "renamed");
    }
}
