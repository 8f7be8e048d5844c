//! LRU cache for parsed git objects.

use std::num::NonZeroUsize;

use gitcore_hash::ObjectId;
use lru::LruCache;

use crate::Object;

/// LRU cache for parsed objects, keyed by id.
pub struct ObjectCache {
    cache: LruCache<ObjectId, Object>,
}

impl ObjectCache {
    /// Create with the given capacity (number of objects).
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap()),
            ),
        }
    }

    /// Get a cached object (promotes it to most-recently-used).
    pub fn get(&mut self, oid: &ObjectId) -> Option<&Object> {
        self.cache.get(oid)
    }

    /// Insert an object. Returns the evicted entry if the cache was full.
    pub fn insert(&mut self, oid: ObjectId, obj: Object) -> Option<(ObjectId, Object)> {
        self.cache.push(oid, obj)
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
