//! LRU cache of decoded objects.
//!
//! Reachability walks revisit the same trees and commits many times per
//! fetch; caching the decoded form skips repeated inflation.

use crate::{GitObject, ObjectId};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Current number of cached objects.
    pub size: usize,
}

impl CacheStats {
    /// Returns the cache hit ratio.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded cache keyed by object id. A capacity of zero disables it.
pub struct ObjectCache {
    entries: Option<Mutex<LruCache<ObjectId, GitObject>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ObjectCache {
    /// Creates a cache holding at most `capacity` objects.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks up an object, refreshing its recency.
    pub fn get(&self, id: &ObjectId) -> Option<GitObject> {
        let entries = self.entries.as_ref()?;
        let found = entries.lock().get(id).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Inserts an object.
    pub fn insert(&self, object: GitObject) {
        if let Some(entries) = &self.entries {
            entries.lock().put(object.id, object);
        }
    }

    /// Returns current statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.entries.as_ref().map(|e| e.lock().len()).unwrap_or(0),
        }
    }
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache").field("stats", &self.stats()).finish()
    }
}
