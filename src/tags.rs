//! Tag store
//!
//! Analysts tag individual responses by primary key. Each dataset has at
//! most one tag map, created lazily by the first tagging operation or by a
//! `Tag` enrichment, and persisted to `{dir}/{prefix}_{dataset}.json`.

use crate::error::Result;
use crate::persistence;
use crate::types::DatasetId;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub type PrimaryKey = String;

/// Persisted form of a tag map
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TagMapRecord {
    dataset_id: DatasetId,
    primary_key: String,
    map: BTreeMap<String, Vec<PrimaryKey>>,
}

/// Two-way tag index for one dataset
#[derive(Debug, Clone)]
pub struct TagMap {
    pub dataset_id: DatasetId,
    pub primary_key_name: String,
    path: Option<PathBuf>,
    keys_by_tag: BTreeMap<String, BTreeSet<PrimaryKey>>,
    tags_by_key: BTreeMap<PrimaryKey, BTreeSet<String>>,
}

impl TagMap {
    pub fn new(dataset_id: DatasetId, primary_key_name: impl Into<String>) -> Self {
        TagMap {
            dataset_id,
            primary_key_name: primary_key_name.into(),
            path: None,
            keys_by_tag: BTreeMap::new(),
            tags_by_key: BTreeMap::new(),
        }
    }

    fn from_record(record: TagMapRecord, path: PathBuf) -> Self {
        let mut tag_map = TagMap::new(record.dataset_id, record.primary_key);
        tag_map.path = Some(path);
        for (tag, keys) in record.map {
            tag_map.insert(&tag, &keys);
        }
        tag_map
    }

    fn to_record(&self) -> TagMapRecord {
        TagMapRecord {
            dataset_id: self.dataset_id,
            primary_key: self.primary_key_name.clone(),
            map: self
                .keys_by_tag
                .iter()
                .map(|(tag, keys)| (tag.clone(), keys.iter().cloned().collect()))
                .collect(),
        }
    }

    /// Tags attached to a primary key (sorted)
    pub fn tags_for(&self, key: &str) -> BTreeSet<String> {
        self.tags_by_key.get(key).cloned().unwrap_or_default()
    }

    /// Primary keys carrying a tag (sorted)
    pub fn keys_for(&self, tag: &str) -> BTreeSet<PrimaryKey> {
        self.keys_by_tag.get(tag).cloned().unwrap_or_default()
    }

    pub fn has_tag(&self, key: &str, tag: &str) -> bool {
        self.tags_by_key
            .get(key)
            .map(|tags| tags.contains(tag))
            .unwrap_or(false)
    }

    /// All tags in use
    pub fn tag_set(&self) -> BTreeSet<String> {
        self.keys_by_tag.keys().cloned().collect()
    }

    /// Attach every tag to every key. Nothing changes unless the write succeeds.
    pub fn add_tags(
        &mut self,
        tags: &[String],
        keys: &[PrimaryKey],
    ) -> Result<BTreeMap<String, BTreeSet<PrimaryKey>>> {
        let mut updated = self.clone();
        for tag in tags {
            updated.insert(tag, keys);
        }
        updated.save()?;
        *self = updated;
        Ok(self.snapshot(tags))
    }

    /// Detach every tag from every key. Nothing changes unless the write succeeds.
    pub fn remove_tags(
        &mut self,
        tags: &[String],
        keys: &[PrimaryKey],
    ) -> Result<BTreeMap<String, BTreeSet<PrimaryKey>>> {
        let mut updated = self.clone();
        for tag in tags {
            updated.delete(tag, keys);
        }
        updated.save()?;
        *self = updated;
        Ok(self.snapshot(tags))
    }

    fn insert(&mut self, tag: &str, keys: &[PrimaryKey]) {
        let tagged = self.keys_by_tag.entry(tag.to_string()).or_default();
        for key in keys {
            tagged.insert(key.clone());
            self.tags_by_key
                .entry(key.clone())
                .or_default()
                .insert(tag.to_string());
        }
    }

    fn delete(&mut self, tag: &str, keys: &[PrimaryKey]) {
        if let Some(tagged) = self.keys_by_tag.get_mut(tag) {
            for key in keys {
                tagged.remove(key);
            }
            if tagged.is_empty() {
                self.keys_by_tag.remove(tag);
            }
        }

        for key in keys {
            if let Some(tags) = self.tags_by_key.get_mut(key) {
                tags.remove(tag);
                if tags.is_empty() {
                    self.tags_by_key.remove(key);
                }
            }
        }
    }

    fn snapshot(&self, tags: &[String]) -> BTreeMap<String, BTreeSet<PrimaryKey>> {
        tags.iter()
            .map(|tag| (tag.clone(), self.keys_for(tag)))
            .collect()
    }

    fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => persistence::save(path, &self.to_record()),
            None => Ok(()),
        }
    }
}

pub type SharedTagMap = Arc<RwLock<TagMap>>;

/// Dataset-scoped tag maps
pub struct TagStore {
    tag_dir: Option<PathBuf>,
    tag_prefix: String,
    tag_maps: DashMap<DatasetId, SharedTagMap>,
}

impl TagStore {
    /// Tag store persisting under `tag_dir`
    pub fn new(tag_dir: impl Into<PathBuf>, tag_prefix: impl Into<String>) -> Self {
        TagStore {
            tag_dir: Some(tag_dir.into()),
            tag_prefix: tag_prefix.into(),
            tag_maps: DashMap::new(),
        }
    }

    /// Tag store that never touches disk
    pub fn in_memory() -> Self {
        TagStore {
            tag_dir: None,
            tag_prefix: String::new(),
            tag_maps: DashMap::new(),
        }
    }

    fn tag_map_path(&self, dataset_id: DatasetId) -> Option<PathBuf> {
        self.tag_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}_{}.json", self.tag_prefix, dataset_id)))
    }

    /// Existing tag map for a dataset, loading it from disk on first access
    pub fn get(&self, dataset_id: DatasetId) -> Result<Option<SharedTagMap>> {
        if let Some(tag_map) = self.tag_maps.get(&dataset_id) {
            return Ok(Some(tag_map.clone()));
        }

        let Some(path) = self.tag_map_path(dataset_id) else {
            return Ok(None);
        };

        match persistence::load_if_exists::<TagMapRecord>(&path)? {
            Some(record) => {
                info!(dataset = %dataset_id, "loaded tag map");
                let loaded = Arc::new(RwLock::new(TagMap::from_record(record, path)));
                let tag_map = self.tag_maps.entry(dataset_id).or_insert(loaded).clone();
                Ok(Some(tag_map))
            }
            None => Ok(None),
        }
    }

    /// Create a tag map; returns the existing one if the dataset already has one
    pub fn create(&self, dataset_id: DatasetId, primary_key_name: &str) -> SharedTagMap {
        let path = self.tag_map_path(dataset_id);
        self.tag_maps
            .entry(dataset_id)
            .and_modify(|_| warn!(dataset = %dataset_id, "tag map already exists"))
            .or_insert_with(|| {
                let mut tag_map = TagMap::new(dataset_id, primary_key_name);
                tag_map.path = path;
                Arc::new(RwLock::new(tag_map))
            })
            .clone()
    }

    pub fn get_or_create(
        &self,
        dataset_id: DatasetId,
        primary_key_name: &str,
    ) -> Result<SharedTagMap> {
        match self.get(dataset_id)? {
            Some(tag_map) => Ok(tag_map),
            None => Ok(self.create(dataset_id, primary_key_name)),
        }
    }
}

impl Default for TagStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_add_and_remove_tags() {
        let mut tag_map = TagMap::new(DatasetId::new(1), "id");

        tag_map
            .add_tags(&strings(&["urgent", "ui"]), &strings(&["r1", "r2"]))
            .unwrap();
        assert_eq!(tag_map.tags_for("r1").len(), 2);
        assert!(tag_map.has_tag("r2", "ui"));

        let result = tag_map
            .remove_tags(&strings(&["ui"]), &strings(&["r1", "r2"]))
            .unwrap();
        assert!(result["ui"].is_empty());
        assert!(!tag_map.tag_set().contains("ui"));
        assert_eq!(tag_map.tags_for("r1"), BTreeSet::from(["urgent".to_string()]));
    }

    #[test]
    fn test_create_is_idempotent() {
        let store = TagStore::in_memory();
        let first = store.create(DatasetId::new(1), "id");
        first
            .write()
            .add_tags(&strings(&["x"]), &strings(&["k"]))
            .unwrap();

        let second = store.create(DatasetId::new(1), "other");
        assert!(second.read().has_tag("k", "x"));
        assert_eq!(second.read().primary_key_name, "id");
    }

    #[test]
    fn test_tag_map_persists() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = TagStore::new(dir.path(), "tags");
            let tag_map = store.get_or_create(DatasetId::new(4), "id").unwrap();
            tag_map
                .write()
                .add_tags(&strings(&["bug"]), &strings(&["7"]))
                .unwrap();
        }

        let store = TagStore::new(dir.path(), "tags");
        let tag_map = store.get(DatasetId::new(4)).unwrap().unwrap();
        assert!(tag_map.read().has_tag("7", "bug"));
        assert!(store.get(DatasetId::new(5)).unwrap().is_none());
    }

    #[test]
    fn test_failed_save_leaves_tags_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = TagStore::new(dir.path(), "tags");
        let tag_map = store.get_or_create(DatasetId::new(1), "id").unwrap();
        tag_map
            .write()
            .add_tags(&strings(&["ui"]), &strings(&["3"]))
            .unwrap();

        // a directory where the temporary file should go makes the write fail
        std::fs::create_dir(dir.path().join("tags_1.json.tmp")).unwrap();

        assert!(tag_map
            .write()
            .add_tags(&strings(&["bug"]), &strings(&["7"]))
            .is_err());
        assert!(!tag_map.read().has_tag("7", "bug"));
        assert!(!tag_map.read().tag_set().contains("bug"));

        assert!(tag_map
            .write()
            .remove_tags(&strings(&["ui"]), &strings(&["3"]))
            .is_err());
        assert!(tag_map.read().has_tag("3", "ui"));
    }
}
