//! Content-addressed object store and graph walks.

use crate::backend::{MemoryBackend, ObjectBackend};
use crate::cache::{CacheStats, ObjectCache};
use crate::compression::{decode_record, encode_record, CompressionLevel, CompressionStats, CompressionStatsSnapshot};
use crate::parse::{parse_commit, parse_tag, parse_tree, Commit, EntryKind, TreeEntry};
use crate::{GitObject, ObjectId, ObjectType, Result, StorageError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Object store tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// zlib level for stored records.
    pub compression: CompressionLevel,
    /// Decoded objects kept in memory per repository. Zero disables the cache.
    pub cache_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            compression: CompressionLevel::Default,
            cache_capacity: 4096,
        }
    }
}

/// Result of a reachability walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Closure {
    /// Objects reached and present in the store.
    pub objects: HashSet<ObjectId>,
    /// Objects referenced along the way but absent from the store.
    pub missing: HashSet<ObjectId>,
}

/// Content-addressed object store.
///
/// Writes are idempotent, so concurrent writers need no coordination.
pub struct ObjectStore {
    backend: Box<dyn ObjectBackend>,
    cache: ObjectCache,
    compression: CompressionLevel,
    stats: CompressionStats,
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("compression", &self.compression)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore {
    /// Creates a new empty in-memory object store.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates an in-memory store with the given tuning.
    pub fn with_config(config: StoreConfig) -> Self {
        Self::with_backend(MemoryBackend::new(), config)
    }

    /// Creates a store over an arbitrary backend.
    pub fn with_backend(backend: impl ObjectBackend + 'static, config: StoreConfig) -> Self {
        Self {
            backend: Box::new(backend),
            cache: ObjectCache::new(config.cache_capacity),
            compression: config.compression,
            stats: CompressionStats::new(),
        }
    }

    /// Hashes and stores content, returning its id. Re-putting is a no-op.
    pub fn put_object(&self, object_type: ObjectType, content: impl Into<Bytes>) -> Result<ObjectId> {
        self.put(GitObject::new(object_type, content))
    }

    /// Stores a blob and returns its ID.
    pub fn put_blob(&self, content: impl Into<Bytes>) -> Result<ObjectId> {
        self.put_object(ObjectType::Blob, content)
    }

    /// Stores a pre-built object after re-verifying its id.
    pub fn put(&self, object: GitObject) -> Result<ObjectId> {
        object.verify()?;
        let id = object.id;
        if self.backend.contains(&id)? {
            return Ok(id);
        }

        let record = encode_record(&object, self.compression)?;
        self.stats
            .record_compress(object.data.len() as u64, record.len() as u64);
        if self.backend.write(id, Bytes::from(record))? {
            tracing::trace!(id = %id, kind = %object.object_type, size = object.size(), "stored object");
        }
        Ok(id)
    }

    /// Loads an object. Absence is `Ok(None)`, never an error.
    pub fn get_object(&self, id: &ObjectId) -> Result<Option<GitObject>> {
        if let Some(object) = self.cache.get(id) {
            return Ok(Some(object));
        }
        let Some(record) = self.backend.read(id)? else {
            return Ok(None);
        };

        let object = decode_record(&record)?;
        self.stats.record_decompress();
        if object.id != *id {
            tracing::error!(expected = %id, actual = %object.id, "object record filed under wrong id");
            return Err(StorageError::Integrity(format!(
                "record filed under {} hashes to {}",
                id, object.id
            )));
        }

        self.cache.insert(object.clone());
        Ok(Some(object))
    }

    /// Loads an object that must exist.
    pub fn get(&self, id: &ObjectId) -> Result<GitObject> {
        self.get_object(id)?
            .ok_or_else(|| StorageError::NotFound(format!("object {}", id)))
    }

    /// Loads and parses a commit. `Ok(None)` if absent.
    pub fn get_commit(&self, id: &ObjectId) -> Result<Option<Commit>> {
        match self.get_object(id)? {
            None => Ok(None),
            Some(object) if object.object_type == ObjectType::Commit => {
                parse_commit(&object.data).map(Some)
            }
            Some(object) => Err(StorageError::InvalidObject(format!(
                "{} is a {}, not a commit",
                id, object.object_type
            ))),
        }
    }

    /// Loads and parses a tree. `Ok(None)` if absent.
    pub fn get_tree(&self, id: &ObjectId) -> Result<Option<Vec<TreeEntry>>> {
        match self.get_object(id)? {
            None => Ok(None),
            Some(object) if object.object_type == ObjectType::Tree => parse_tree(&object.data).map(Some),
            Some(object) => Err(StorageError::InvalidObject(format!(
                "{} is a {}, not a tree",
                id, object.object_type
            ))),
        }
    }

    /// Checks if an object exists.
    pub fn contains(&self, id: &ObjectId) -> Result<bool> {
        self.backend.contains(id)
    }

    /// Returns the number of objects in the store.
    pub fn len(&self) -> Result<usize> {
        self.backend.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> Result<bool> {
        self.backend.is_empty()
    }

    /// Lists all object IDs.
    pub fn list_objects(&self) -> Result<Vec<ObjectId>> {
        self.backend.list()
    }

    /// Compression counters since creation.
    pub fn compression_stats(&self) -> CompressionStatsSnapshot {
        self.stats.snapshot()
    }

    /// Decoded-object cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Every object reachable from `start`: commits through all parents,
    /// their trees, subtrees and blobs, and tag targets.
    ///
    /// Missing objects are dead ends.
    pub fn get_reachable_objects(&self, start: &ObjectId) -> Result<HashSet<ObjectId>> {
        Ok(self.reachable_closure([*start], &HashSet::new())?.objects)
    }

    /// Walks from several starting points without entering any id in `stop`.
    ///
    /// Uses an explicit worklist and visited set, so arbitrarily deep
    /// histories and malformed cyclic graphs both terminate.
    pub fn reachable_closure(
        &self,
        starts: impl IntoIterator<Item = ObjectId>,
        stop: &HashSet<ObjectId>,
    ) -> Result<Closure> {
        let mut closure = Closure::default();
        let mut visited = HashSet::new();
        let mut pending: Vec<ObjectId> = starts.into_iter().collect();

        while let Some(id) = pending.pop() {
            if stop.contains(&id) || !visited.insert(id) {
                continue;
            }
            let Some(object) = self.get_object(&id)? else {
                closure.missing.insert(id);
                continue;
            };
            closure.objects.insert(id);

            match object.object_type {
                ObjectType::Commit => {
                    let commit = parse_commit(&object.data)?;
                    pending.push(commit.tree);
                    pending.extend(commit.parents);
                }
                ObjectType::Tree => {
                    for entry in parse_tree(&object.data)? {
                        match entry.kind {
                            EntryKind::Tree => pending.push(entry.id),
                            // Blobs have no outgoing edges; a presence check is enough.
                            EntryKind::Blob => {
                                if stop.contains(&entry.id) || !visited.insert(entry.id) {
                                    continue;
                                }
                                if self.contains(&entry.id)? {
                                    closure.objects.insert(entry.id);
                                } else {
                                    closure.missing.insert(entry.id);
                                }
                            }
                            EntryKind::Gitlink => {}
                        }
                    }
                }
                ObjectType::Tag => pending.push(parse_tag(&object.data)?.object),
                ObjectType::Blob => {}
            }
        }

        Ok(closure)
    }

    /// Commits reachable from `start`, newest first, following all parents,
    /// at most `limit` of them.
    pub fn walk_commits(&self, start: &ObjectId, limit: usize) -> Result<Vec<(ObjectId, Commit)>> {
        self.walk_commits_excluding(start, None, limit)
    }

    /// Like [`walk_commits`](Self::walk_commits) but never descends into
    /// `exclude`, which yields the commits a push introduces on top of the
    /// old tip.
    pub fn walk_commits_excluding(
        &self,
        start: &ObjectId,
        exclude: Option<&ObjectId>,
        limit: usize,
    ) -> Result<Vec<(ObjectId, Commit)>> {
        let mut commits = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([*start]);

        while let Some(id) = queue.pop_front() {
            if commits.len() >= limit {
                break;
            }
            if Some(&id) == exclude || !visited.insert(id) {
                continue;
            }
            let Some(commit) = self.get_commit(&id)? else {
                continue;
            };
            queue.extend(commit.parents.iter().copied());
            commits.push((id, commit));
        }

        Ok(commits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::EntryKind;

    const AUTHOR: &str = "Alice <alice@example.com> 1700000000 +0000";

    struct Snapshot {
        commit: ObjectId,
        tree: ObjectId,
        blob: ObjectId,
    }

    /// Stores a one-file snapshot on top of `parents`.
    fn snapshot(store: &ObjectStore, content: &str, parents: &[ObjectId]) -> Snapshot {
        let blob = store.put_blob(content.as_bytes().to_vec()).unwrap();
        let tree = store
            .put(GitObject::tree(&[TreeEntry::new("100644", "file.txt", EntryKind::Blob, blob)]))
            .unwrap();
        let commit = store
            .put(GitObject::commit(&tree, parents, AUTHOR, AUTHOR, content))
            .unwrap();
        Snapshot { commit, tree, blob }
    }

    #[test]
    fn test_put_get_roundtrip() {
        let store = ObjectStore::new();
        let id = store.put_object(ObjectType::Blob, b"Hello, World!".to_vec()).unwrap();

        let object = store.get_object(&id).unwrap().unwrap();
        assert_eq!(object.data.as_ref(), b"Hello, World!");
        assert_eq!(object.object_type, ObjectType::Blob);
        assert_eq!(id, ObjectId::hash_object(ObjectType::Blob, b"Hello, World!"));
    }

    #[test]
    fn test_put_is_idempotent() {
        let store = ObjectStore::new();
        let first = store.put_blob(b"same".to_vec()).unwrap();
        let second = store.put_blob(b"same".to_vec()).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.compression_stats().compress_count, 1);
    }

    #[test]
    fn test_put_rejects_wrong_id() {
        let store = ObjectStore::new();
        let mut object = GitObject::blob(b"honest".to_vec());
        object.id = ObjectId::from_bytes([9u8; 20]);
        assert!(matches!(store.put(object), Err(StorageError::Integrity(_))));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_get_missing_is_none() {
        let store = ObjectStore::new();
        let id = ObjectId::from_bytes([1u8; 20]);
        assert!(store.get_object(&id).unwrap().is_none());
        assert!(matches!(store.get(&id), Err(StorageError::NotFound(_))));
        assert!(store.get_commit(&id).unwrap().is_none());
    }

    #[test]
    fn test_misfiled_record_is_integrity_error() {
        let backend = std::sync::Arc::new(MemoryBackend::new());
        let store = ObjectStore::with_backend(backend.clone(), StoreConfig::default());

        let real = GitObject::blob(b"real".to_vec());
        let wrong_id = ObjectId::from_bytes([4u8; 20]);
        let record = encode_record(&real, CompressionLevel::Fast).unwrap();
        backend.write(wrong_id, Bytes::from(record)).unwrap();

        assert!(matches!(store.get_object(&wrong_id), Err(StorageError::Integrity(_))));
    }

    #[test]
    fn test_typed_getters() {
        let store = ObjectStore::new();
        let snap = snapshot(&store, "one", &[]);

        let commit = store.get_commit(&snap.commit).unwrap().unwrap();
        assert_eq!(commit.tree, snap.tree);
        let tree = store.get_tree(&snap.tree).unwrap().unwrap();
        assert_eq!(tree[0].id, snap.blob);

        assert!(store.get_commit(&snap.tree).is_err());
        assert!(store.get_tree(&snap.commit).is_err());
    }

    #[test]
    fn test_cache_serves_repeat_reads() {
        let store = ObjectStore::new();
        let id = store.put_blob(b"hot".to_vec()).unwrap();
        store.get_object(&id).unwrap();
        store.get_object(&id).unwrap();
        assert_eq!(store.cache_stats().hits, 1);
        assert_eq!(store.compression_stats().decompress_count, 1);
    }

    #[test]
    fn test_reachability_chain_is_monotonic() {
        let store = ObjectStore::new();
        let c0 = snapshot(&store, "zero", &[]);
        let c1 = snapshot(&store, "one", &[c0.commit]);
        let c2 = snapshot(&store, "two", &[c1.commit]);

        let r0 = store.get_reachable_objects(&c0.commit).unwrap();
        let r1 = store.get_reachable_objects(&c1.commit).unwrap();
        let r2 = store.get_reachable_objects(&c2.commit).unwrap();

        assert_eq!(r0, HashSet::from([c0.commit, c0.tree, c0.blob]));
        assert!(r1.is_superset(&r0));
        assert!(r2.is_superset(&r1));
        assert_eq!(r2.len(), 9);
    }

    #[test]
    fn test_reachability_follows_subtrees_and_merges() {
        let store = ObjectStore::new();
        let left = snapshot(&store, "left", &[]);
        let right = snapshot(&store, "right", &[]);

        let nested_blob = store.put_blob(b"nested".to_vec()).unwrap();
        let subtree = store
            .put(GitObject::tree(&[TreeEntry::new("100644", "n.txt", EntryKind::Blob, nested_blob)]))
            .unwrap();
        let root = store
            .put(GitObject::tree(&[
                TreeEntry::new("40000", "dir", EntryKind::Tree, subtree),
                TreeEntry::new("160000", "module", EntryKind::Gitlink, ObjectId::from_bytes([8; 20])),
            ]))
            .unwrap();
        let merge = store
            .put(GitObject::commit(&root, &[left.commit, right.commit], AUTHOR, AUTHOR, "merge"))
            .unwrap();

        let reachable = store.get_reachable_objects(&merge).unwrap();
        for id in [merge, root, subtree, nested_blob, left.commit, right.commit, left.blob, right.blob] {
            assert!(reachable.contains(&id));
        }
        assert!(!reachable.contains(&ObjectId::from_bytes([8; 20])));
    }

    #[test]
    fn test_reachability_missing_is_dead_end() {
        let store = ObjectStore::new();
        let absent_parent = ObjectId::from_bytes([7; 20]);
        let snap = snapshot(&store, "orphan", &[absent_parent]);

        let closure = store.reachable_closure([snap.commit], &HashSet::new()).unwrap();
        assert_eq!(closure.objects.len(), 3);
        assert_eq!(closure.missing, HashSet::from([absent_parent]));

        let unknown = ObjectId::from_bytes([6; 20]);
        assert!(store.get_reachable_objects(&unknown).unwrap().is_empty());
    }

    #[test]
    fn test_reachability_stop_set() {
        let store = ObjectStore::new();
        let c0 = snapshot(&store, "zero", &[]);
        let c1 = snapshot(&store, "one", &[c0.commit]);

        let closure = store
            .reachable_closure([c1.commit], &HashSet::from([c0.commit]))
            .unwrap();
        assert_eq!(closure.objects, HashSet::from([c1.commit, c1.tree, c1.blob]));
    }

    #[test]
    fn test_reachability_tag_target() {
        let store = ObjectStore::new();
        let snap = snapshot(&store, "tagged", &[]);
        let tag = store
            .put(GitObject::tag(&snap.commit, ObjectType::Commit, "v1", AUTHOR, "release"))
            .unwrap();

        let reachable = store.get_reachable_objects(&tag).unwrap();
        assert!(reachable.contains(&snap.commit));
        assert!(reachable.contains(&snap.blob));
    }

    #[test]
    fn test_walk_commits_order_and_limit() {
        let store = ObjectStore::new();
        let c0 = snapshot(&store, "zero", &[]);
        let c1 = snapshot(&store, "one", &[c0.commit]);
        let c2 = snapshot(&store, "two", &[c1.commit]);

        let all = store.walk_commits(&c2.commit, 10).unwrap();
        let ids: Vec<_> = all.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![c2.commit, c1.commit, c0.commit]);
        assert_eq!(all[0].1.summary(), "two");

        let limited = store.walk_commits(&c2.commit, 2).unwrap();
        assert_eq!(limited.len(), 2);

        let introduced = store
            .walk_commits_excluding(&c2.commit, Some(&c0.commit), 10)
            .unwrap();
        assert_eq!(introduced.len(), 2);
    }

    #[test]
    fn test_walk_commits_all_parents() {
        let store = ObjectStore::new();
        let base = snapshot(&store, "base", &[]);
        let left = snapshot(&store, "left", &[base.commit]);
        let right = snapshot(&store, "right", &[base.commit]);
        let merge = snapshot(&store, "merge", &[left.commit, right.commit]);

        let walked = store.walk_commits(&merge.commit, 100).unwrap();
        assert_eq!(walked.len(), 4);
    }

    #[test]
    fn test_walk_commits_rejects_non_commit_start() {
        let store = ObjectStore::new();
        let blob = store.put_blob(b"not a commit".to_vec()).unwrap();
        assert!(store.walk_commits(&blob, 10).is_err());
    }
}
