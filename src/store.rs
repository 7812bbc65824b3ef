//! Persisted mapping from cluster id to an ordered list of records.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single stored (conflict, resolution) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub conflict: String,
    pub resolution: String,
}

impl ClusterRecord {
    pub fn new(conflict: impl Into<String>, resolution: impl Into<String>) -> Self {
        Self {
            conflict: conflict.into(),
            resolution: resolution.into(),
        }
    }

    pub fn is_empty_pair(&self) -> bool {
        self.conflict.trim().is_empty() && self.resolution.trim().is_empty()
    }
}

/// The full on-disk mapping of cluster id -> ordered records. `BTreeMap`
/// keeps iteration in ascending id order, which doubles as the
/// first-encountered tie-break order used by the assignment engine since
/// ids are always handed out as `max_existing + 1`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterIndex {
    pub clusters: BTreeMap<u32, Vec<ClusterRecord>>,
}

impl ClusterIndex {
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn max_id(&self) -> Option<u32> {
        self.clusters.keys().next_back().copied()
    }

    /// Id to hand out for the next brand-new cluster.
    pub fn next_id(&self) -> u32 {
        self.max_id().map(|m| m + 1).unwrap_or(1)
    }

    /// Append `record` to an existing cluster, or create a new one.
    pub fn insert(&mut self, group_id: u32, record: ClusterRecord) {
        self.clusters.entry(group_id).or_default().push(record);
    }

    pub fn get(&self, group_id: u32) -> Option<&[ClusterRecord]> {
        self.clusters.get(&group_id).map(Vec::as_slice)
    }

    /// All records with their owning cluster id, in ascending id then
    /// insertion order.
    pub fn flatten(&self) -> Vec<(u32, &ClusterRecord)> {
        self.clusters
            .iter()
            .flat_map(|(id, records)| records.iter().map(move |r| (*id, r)))
            .collect()
    }

    pub fn total_records(&self) -> usize {
        self.clusters.values().map(Vec::len).sum()
    }
}

/// Cluster store: atomic load/save of a `ClusterIndex` against a fixed path.
pub struct ClusterStore {
    path: std::path::PathBuf,
}

impl ClusterStore {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads the index: absent or empty file yields an empty index, but a
    /// *present, non-empty* file that fails to parse is treated as a fatal
    /// corruption rather than silently discarded (it would otherwise be
    /// overwritten on the next save, losing whatever was there).
    pub fn load(&self) -> Result<ClusterIndex> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(_) => return Ok(ClusterIndex::default()),
        };

        if contents.trim().is_empty() {
            return Ok(ClusterIndex::default());
        }

        serde_json::from_str(&contents).map_err(|e| Error::StoreCorrupted {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    /// Writes the entire index, pretty-printed, via write-to-temp-then-
    /// rename. Failure here is a hard error; the caller must abort the
    /// process rather than report a group id to downstream consumers.
    pub fn save(&self, index: &ClusterIndex) -> Result<()> {
        self.write(&self.path, index)
    }

    /// Writes `index` to an explicit path (used for archival backups).
    pub fn write(&self, path: &Path, index: &ClusterIndex) -> Result<()> {
        let json = serde_json::to_string_pretty(index)
            .map_err(|e| Error::Serialization(e.to_string()))?;

        let tmp_path = path.with_extension("tmp");
        let write_result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, path)?;
            Ok(())
        })();

        write_result.map_err(|e| Error::StoreIo {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_missing_file_returns_empty() {
        let dir = TempDir::new().unwrap();
        let store = ClusterStore::new(dir.path().join("conflict_index.json"));
        let index = store.load().unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn load_empty_file_returns_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conflict_index.json");
        fs::write(&path, "").unwrap();
        let store = ClusterStore::new(path);
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn load_unparseable_nonempty_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conflict_index.json");
        fs::write(&path, "not json").unwrap();
        let store = ClusterStore::new(path);
        let err = store.load().unwrap_err();
        assert!(matches!(err, Error::StoreCorrupted { .. }));
    }

    #[test]
    fn insert_creates_and_appends() {
        let mut index = ClusterIndex::default();
        index.insert(1, ClusterRecord::new("a", "b"));
        index.insert(1, ClusterRecord::new("c", "d"));
        assert_eq!(index.get(1).unwrap().len(), 2);
    }

    #[test]
    fn next_id_is_max_plus_one() {
        let mut index = ClusterIndex::default();
        assert_eq!(index.next_id(), 1);
        index.insert(1, ClusterRecord::new("a", "b"));
        index.insert(5, ClusterRecord::new("c", "d"));
        assert_eq!(index.next_id(), 6);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = TempDir::new().unwrap();
        let store = ClusterStore::new(dir.path().join("conflict_index.json"));
        let mut index = ClusterIndex::default();
        index.insert(1, ClusterRecord::new("a.b.c", "a.b.x"));
        store.save(&index).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.get(1).unwrap()[0].conflict, "a.b.c");
    }

    #[test]
    fn save_produces_pretty_printed_two_space_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conflict_index.json");
        let store = ClusterStore::new(&path);
        let mut index = ClusterIndex::default();
        index.insert(1, ClusterRecord::new("a.b.c", "a.b.x"));
        store.save(&index).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"1\": [\n    {\n      \"conflict\""));
    }

    #[test]
    fn scenario_s1_first_insert_shapes_index() {
        let dir = TempDir::new().unwrap();
        let store = ClusterStore::new(dir.path().join("conflict_index.json"));
        let mut index = store.load().unwrap();
        assert!(index.is_empty());
        index.insert(index.next_id(), ClusterRecord::new("a.b.c", "a.b.x"));
        store.save(&index).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.clusters.len(), 1);
        assert_eq!(loaded.get(1).unwrap()[0], ClusterRecord::new("a.b.c", "a.b.x"));
    }

    #[test]
    fn flatten_preserves_ascending_id_order() {
        let mut index = ClusterIndex::default();
        index.insert(2, ClusterRecord::new("a", "b"));
        index.insert(1, ClusterRecord::new("c", "d"));
        let flat = index.flatten();
        assert_eq!(flat[0].0, 1);
        assert_eq!(flat[1].0, 2);
    }
}
