//! The projection store: a per-projection key→state store with a metadata
//! index and tag indices, mirroring the event log's own index discipline
//! (write-temp, fsync, rename) but keyed by projection entity key rather
//! than by sequence position.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dcb_core::{StoreError, Tag};
use dcb_store::{write_file_durably, FlushPolicy};
use tokio::sync::RwLock;

use crate::entity::{EntityMetadata, StoredEntity};

/// Below this many keys, `get_all`/tag queries read sequentially; at or
/// above it, reads run with bounded parallelism — the same threshold the
/// event log applies to `ReadMany`.
const PARALLEL_READ_THRESHOLD: usize = 10;

type MetadataIndex = HashMap<String, EntityMetadata>;

/// A single projection's persisted state: entity files, a metadata index,
/// and per-tag key indices.
///
/// The "last known tags per key" cache required to correctly retract stale
/// tag-index entries is `tags_by_key`, an in-memory mirror of the
/// metadata index's own `tags` field; it is rehydrated from that index at
/// [`FsProjectionStore::open`] rather than stored separately, so it always
/// survives a process restart.
#[derive(Debug)]
pub struct FsProjectionStore {
    name: String,
    root: PathBuf,
    flush_policy: FlushPolicy,
    metadata: RwLock<MetadataIndex>,
}

impl FsProjectionStore {
    /// Opens (without requiring it to already exist) the projection
    /// directory `projections_root/<name>`, rehydrating the in-memory
    /// metadata index from disk if present.
    ///
    /// A missing directory is not an error: a newly registered projection
    /// type starts with an empty store until its first rebuild (S6).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] or [`StoreError::Serialization`] if an
    /// existing metadata index file cannot be read.
    pub async fn open(projections_root: &Path, name: &str, flush_policy: FlushPolicy) -> Result<Self, StoreError> {
        let root = projections_root.join(name);
        let metadata = read_metadata_index(&root).await?;
        Ok(Self { name: name.to_string(), root, flush_policy, metadata: RwLock::new(metadata) })
    }

    /// The projection's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Saves `data` under `key`, diffing the key's previous tags (if any)
    /// against `tags` so stale index entries are retracted and fresh ones
    /// added.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] or [`StoreError::Serialization`] on any
    /// underlying storage failure.
    pub async fn save(&self, key: &str, data: serde_json::Value, tags: Vec<Tag>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&data).map_err(StoreError::Serialization)?;
        let size_in_bytes = bytes.len() as u64;

        let previous_tags = {
            let metadata = self.metadata.read().await;
            metadata.get(key).map(|m| m.tags.clone())
        };

        let new_metadata = {
            let metadata = self.metadata.read().await;
            match metadata.get(key) {
                Some(existing) => existing.next(size_in_bytes, tags.clone()),
                None => EntityMetadata::new(size_in_bytes, tags.clone()),
            }
        };

        let entity = StoredEntity { data, metadata: new_metadata.clone() };
        let entity_bytes = serde_json::to_vec(&entity).map_err(StoreError::Serialization)?;
        write_file_durably(&self.entity_path(key), &entity_bytes, self.flush_policy).await?;

        self.update_tag_indices(key, previous_tags.as_deref(), &tags).await?;

        {
            let mut metadata = self.metadata.write().await;
            metadata.insert(key.to_string(), new_metadata);
        }
        self.persist_metadata_index().await
    }

    /// Reads the entity stored at `key`, or `None` if the projection
    /// directory or the key's file is missing.
    ///
    /// A corrupted entity file is treated as [`StoreError::CorruptedEntity`]
    /// rather than propagated verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] for I/O failures other than "not found",
    /// or [`StoreError::CorruptedEntity`] if the file exists but does not
    /// deserialize.
    pub async fn get(&self, key: &str) -> Result<Option<StoredEntity>, StoreError> {
        match tokio::fs::read(self.entity_path(key)).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entity) => Ok(Some(entity)),
                Err(error) => Err(StoreError::CorruptedEntity {
                    projection: self.name.clone(),
                    key: key.to_string(),
                    reason: error.to_string(),
                }),
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(StoreError::io(self.entity_path(key), error)),
        }
    }

    /// Returns `true` if `key` currently has a saved entity.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`FsProjectionStore::get`].
    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Enumerates every key currently stored, using the metadata index when
    /// available and falling back to a directory scan otherwise.
    ///
    /// Corrupted entities are skipped and logged rather than failing the
    /// whole enumeration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the projection directory cannot be
    /// scanned.
    pub async fn get_all(&self) -> Result<Vec<(String, StoredEntity)>, StoreError> {
        let keys = self.list_keys().await?;
        self.load_many(&keys).await
    }

    /// Returns the keys currently carrying `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] or [`StoreError::Serialization`] if the
    /// tag index cannot be read.
    pub async fn query_by_tag(&self, tag: &Tag) -> Result<Vec<String>, StoreError> {
        read_key_list(&self.tag_index_path(tag)).await
    }

    /// Returns the keys carrying every tag in `tags`, intersecting the
    /// per-tag key lists with the same cardinality-ascending rule the event
    /// log's query planner uses.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] or [`StoreError::Serialization`] if a tag
    /// index cannot be read.
    pub async fn query_by_tags(&self, tags: &[Tag]) -> Result<Vec<String>, StoreError> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let mut sets = Vec::with_capacity(tags.len());
        for tag in tags {
            sets.push(read_key_list(&self.tag_index_path(tag)).await?);
        }
        sets.sort_by_key(Vec::len);
        let mut iter = sets.into_iter();
        let Some(mut acc) = iter.next() else {
            return Ok(Vec::new());
        };
        for set in iter {
            acc = intersect_keys(&acc, &set);
            if acc.is_empty() {
                break;
            }
        }
        Ok(acc)
    }

    /// Deletes the entity, its metadata entry, and its tag-index entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on any underlying storage failure.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let previous_tags = {
            let metadata = self.metadata.read().await;
            metadata.get(key).map(|m| m.tags.clone())
        };

        if let Some(tags) = previous_tags {
            self.update_tag_indices(key, Some(&tags), &[]).await?;
        }

        let _ = tokio::fs::remove_file(self.entity_path(key)).await;

        {
            let mut metadata = self.metadata.write().await;
            metadata.remove(key);
        }
        self.persist_metadata_index().await
    }

    /// Removes the tag and metadata indices for this projection, preserving
    /// entity files until they are overwritten — the operation `Rebuild`
    /// performs before replaying the event log from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if an index file cannot be removed.
    pub async fn delete_all_indices(&self) -> Result<(), StoreError> {
        let indices_dir = self.root.join("Indices");
        if indices_dir.exists() {
            tokio::fs::remove_dir_all(&indices_dir).await.map_err(|e| StoreError::io(&indices_dir, e))?;
        }
        {
            let mut metadata = self.metadata.write().await;
            metadata.clear();
        }
        let metadata_path = self.metadata_index_path();
        match tokio::fs::remove_file(&metadata_path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(StoreError::io(&metadata_path, error)),
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        {
            let metadata = self.metadata.read().await;
            if !metadata.is_empty() {
                return Ok(metadata.keys().cloned().collect());
            }
        }

        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| StoreError::io(&self.root, e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::io(&self.root, e))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        Ok(keys)
    }

    async fn load_many(&self, keys: &[String]) -> Result<Vec<(String, StoredEntity)>, StoreError> {
        let this = self;
        if keys.len() < PARALLEL_READ_THRESHOLD {
            let mut out = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(entity) = load_one_logging_corruption(this, key).await {
                    out.push((key.clone(), entity));
                }
            }
            return Ok(out);
        }

        use futures::StreamExt;
        let results: Vec<Option<(String, StoredEntity)>> = futures::stream::iter(keys.iter().cloned())
            .map(|key| async move {
                load_one_logging_corruption(this, &key).await.map(|entity| (key, entity))
            })
            .buffered(8)
            .collect()
            .await;
        Ok(results.into_iter().flatten().collect())
    }

    async fn update_tag_indices(&self, key: &str, previous: Option<&[Tag]>, current: &[Tag]) -> Result<(), StoreError> {
        let previous_set: std::collections::HashSet<&Tag> = previous.unwrap_or(&[]).iter().collect();
        let current_set: std::collections::HashSet<&Tag> = current.iter().collect();

        for tag in previous_set.difference(&current_set) {
            self.remove_key_from_tag_index(tag, key).await?;
        }
        for tag in current_set.difference(&previous_set) {
            self.add_key_to_tag_index(tag, key).await?;
        }
        Ok(())
    }

    async fn add_key_to_tag_index(&self, tag: &Tag, key: &str) -> Result<(), StoreError> {
        let path = self.tag_index_path(tag);
        let mut keys = read_key_list(&path).await?;
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
            keys.sort_unstable();
            write_key_list(&path, &keys, self.flush_policy).await?;
        }
        Ok(())
    }

    async fn remove_key_from_tag_index(&self, tag: &Tag, key: &str) -> Result<(), StoreError> {
        let path = self.tag_index_path(tag);
        let mut keys = read_key_list(&path).await?;
        let before = keys.len();
        keys.retain(|k| k != key);
        if keys.len() != before {
            write_key_list(&path, &keys, self.flush_policy).await?;
        }
        Ok(())
    }

    async fn persist_metadata_index(&self) -> Result<(), StoreError> {
        let metadata = self.metadata.read().await;
        let bytes = serde_json::to_vec(&*metadata).map_err(StoreError::Serialization)?;
        write_file_durably(&self.metadata_index_path(), &bytes, self.flush_policy).await
    }

    fn entity_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    fn metadata_index_path(&self) -> PathBuf {
        self.root.join("Metadata").join("index.json")
    }

    fn tag_index_path(&self, tag: &Tag) -> PathBuf {
        let (key_segment, value_segment) = tag.index_path_segments();
        self.root.join("Indices").join(format!("{key_segment}_{value_segment}.json"))
    }
}

async fn load_one_logging_corruption(store: &FsProjectionStore, key: &str) -> Option<StoredEntity> {
    match store.get(key).await {
        Ok(entity) => entity,
        Err(error @ StoreError::CorruptedEntity { .. }) => {
            tracing::warn!(projection = store.name(), key, %error, "skipping corrupted projection entity");
            None
        }
        Err(error) => {
            tracing::error!(projection = store.name(), key, %error, "failed to load projection entity");
            None
        }
    }
}

async fn read_metadata_index(root: &Path) -> Result<MetadataIndex, StoreError> {
    let path = root.join("Metadata").join("index.json");
    match tokio::fs::read(&path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(StoreError::Serialization),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(error) => Err(StoreError::io(&path, error)),
    }
}

async fn read_key_list(path: &Path) -> Result<Vec<String>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(StoreError::Serialization),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(error) => Err(StoreError::io(path, error)),
    }
}

async fn write_key_list(path: &Path, keys: &[String], policy: FlushPolicy) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(keys).map_err(StoreError::Serialization)?;
    write_file_durably(path, &bytes, policy).await
}

fn intersect_keys(a: &[String], b: &[String]) -> Vec<String> {
    let b_set: std::collections::HashSet<&String> = b.iter().collect();
    a.iter().filter(|k| b_set.contains(k)).cloned().collect()
}

/// A shared handle to a projection store, used wherever multiple owners
/// (the manager, the daemon) need concurrent access to the same store.
pub type SharedProjectionStore = Arc<FsProjectionStore>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Panics: test-only, failure is the assertion.
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let store = FsProjectionStore::open(dir.path(), "orders", FlushPolicy::FlushImmediately)
            .await
            .unwrap_or_else(|e| panic!("open: {e}"));

        store.save("order-1", serde_json::json!({ "total": 10 }), vec![]).await.unwrap_or_else(|e| panic!("save: {e}"));
        let entity = store.get("order-1").await.unwrap_or_else(|e| panic!("get: {e}")).unwrap_or_else(|| panic!("expected entity"));
        assert_eq!(entity.metadata.version, 1);

        store.save("order-1", serde_json::json!({ "total": 20 }), vec![]).await.unwrap_or_else(|e| panic!("save: {e}"));
        let updated = store.get("order-1").await.unwrap_or_else(|e| panic!("get: {e}")).unwrap_or_else(|| panic!("expected entity"));
        assert_eq!(updated.metadata.version, 2);
        assert_eq!(updated.metadata.created_at, entity.metadata.created_at);
    }

    #[tokio::test]
    async fn missing_directory_returns_none_not_error() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let store = FsProjectionStore::open(dir.path(), "brand-new", FlushPolicy::FlushImmediately)
            .await
            .unwrap_or_else(|e| panic!("open: {e}"));
        assert!(store.get("anything").await.unwrap_or_else(|e| panic!("get: {e}")).is_none());
    }

    #[tokio::test]
    async fn tag_index_is_retracted_when_tag_changes() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let store = FsProjectionStore::open(dir.path(), "customers", FlushPolicy::FlushImmediately)
            .await
            .unwrap_or_else(|e| panic!("open: {e}"));

        let gold = Tag::new("tier", "gold");
        let silver = Tag::new("tier", "silver");

        store.save("cust-1", serde_json::json!({}), vec![gold.clone()]).await.unwrap_or_else(|e| panic!("save: {e}"));
        assert_eq!(store.query_by_tag(&gold).await.unwrap_or_else(|e| panic!("query: {e}")), vec!["cust-1".to_string()]);

        store.save("cust-1", serde_json::json!({}), vec![silver.clone()]).await.unwrap_or_else(|e| panic!("save: {e}"));
        assert!(store.query_by_tag(&gold).await.unwrap_or_else(|e| panic!("query: {e}")).is_empty());
        assert_eq!(store.query_by_tag(&silver).await.unwrap_or_else(|e| panic!("query: {e}")), vec!["cust-1".to_string()]);
    }

    #[tokio::test]
    async fn tag_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let gold = Tag::new("tier", "gold");
        let silver = Tag::new("tier", "silver");

        {
            let store = FsProjectionStore::open(dir.path(), "customers", FlushPolicy::FlushImmediately)
                .await
                .unwrap_or_else(|e| panic!("open: {e}"));
            store.save("cust-1", serde_json::json!({}), vec![gold.clone()]).await.unwrap_or_else(|e| panic!("save: {e}"));
        }

        let reopened = FsProjectionStore::open(dir.path(), "customers", FlushPolicy::FlushImmediately)
            .await
            .unwrap_or_else(|e| panic!("open: {e}"));
        reopened.save("cust-1", serde_json::json!({}), vec![silver.clone()]).await.unwrap_or_else(|e| panic!("save: {e}"));

        assert!(reopened.query_by_tag(&gold).await.unwrap_or_else(|e| panic!("query: {e}")).is_empty());
    }

    #[tokio::test]
    async fn query_by_tags_intersects_regardless_of_order() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let store = FsProjectionStore::open(dir.path(), "customers", FlushPolicy::FlushImmediately)
            .await
            .unwrap_or_else(|e| panic!("open: {e}"));

        let tier = Tag::new("tier", "professional");
        let status = Tag::new("status", "active");

        for i in 0..4 {
            store.save(&format!("tier-only-{i}"), serde_json::json!({}), vec![tier.clone()]).await.unwrap_or_else(|e| panic!("save: {e}"));
        }
        store.save("status-only", serde_json::json!({}), vec![status.clone()]).await.unwrap_or_else(|e| panic!("save: {e}"));
        store.save("both", serde_json::json!({}), vec![tier.clone(), status.clone()]).await.unwrap_or_else(|e| panic!("save: {e}"));

        let forward = store.query_by_tags(&[tier.clone(), status.clone()]).await.unwrap_or_else(|e| panic!("query: {e}"));
        let reversed = store.query_by_tags(&[status, tier]).await.unwrap_or_else(|e| panic!("query: {e}"));
        assert_eq!(forward, vec!["both".to_string()]);
        assert_eq!(reversed, vec!["both".to_string()]);
    }

    #[tokio::test]
    async fn delete_all_indices_preserves_entity_files() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let store = FsProjectionStore::open(dir.path(), "customers", FlushPolicy::FlushImmediately)
            .await
            .unwrap_or_else(|e| panic!("open: {e}"));

        let tag = Tag::new("tier", "gold");
        store.save("cust-1", serde_json::json!({ "x": 1 }), vec![tag.clone()]).await.unwrap_or_else(|e| panic!("save: {e}"));
        store.delete_all_indices().await.unwrap_or_else(|e| panic!("delete_all_indices: {e}"));

        assert!(store.query_by_tag(&tag).await.unwrap_or_else(|e| panic!("query: {e}")).is_empty());
        assert!(dir.path().join("customers").join("cust-1.json").exists());
    }
}

#[cfg(test)]
mod intersect_keys_property_tests {
    use super::intersect_keys;
    use proptest::collection::{hash_set, vec as prop_vec};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn keys(values: HashSet<u32>) -> Vec<String> {
        let mut sorted: Vec<u32> = values.into_iter().collect();
        sorted.sort_unstable();
        sorted.into_iter().map(|v| format!("key-{v}")).collect()
    }

    proptest! {
        /// Mirrors the planner's cardinality-order regression: intersecting
        /// two key lists must agree with plain set intersection no matter
        /// which list is passed first.
        #[test]
        fn intersect_keys_matches_set_intersection(
            a in hash_set(0u32..100, 0..30),
            b in hash_set(0u32..100, 0..30),
        ) {
            let expected: HashSet<String> = a.intersection(&b).map(|v| format!("key-{v}")).collect();
            let a_keys = keys(a);
            let b_keys = keys(b);

            let forward: HashSet<String> = intersect_keys(&a_keys, &b_keys).into_iter().collect();
            let reversed: HashSet<String> = intersect_keys(&b_keys, &a_keys).into_iter().collect();

            prop_assert_eq!(&forward, &expected);
            prop_assert_eq!(forward, reversed);
        }

        /// Intersecting with a list's own duplicate-free copy returns it
        /// unchanged, up to ordering.
        #[test]
        fn intersect_keys_with_self_is_identity(values in prop_vec(0u32..100, 0..30)) {
            let unique: Vec<String> = keys(values.into_iter().collect());
            let result: HashSet<String> = intersect_keys(&unique, &unique).into_iter().collect();
            let expected: HashSet<String> = unique.into_iter().collect();
            prop_assert_eq!(result, expected);
        }
    }
}
