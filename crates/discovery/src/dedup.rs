//! Bounded LRU dedup cache for query ids (§4.8): suppresses re-forwarding
//! a `ServiceQuery`/`FileQuery` this node has already seen.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use uuid::Uuid;

pub const DEFAULT_CAPACITY: usize = 1024;

pub struct DedupCache {
    seen: Mutex<LruCache<Uuid, ()>>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap());
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns `true` if `query_id` had not been seen before, recording it
    /// as seen either way.
    pub fn observe(&self, query_id: Uuid) -> bool {
        let mut seen = self.seen.lock();
        if seen.get(&query_id).is_some() {
            false
        } else {
            seen.put(query_id, ());
            true
        }
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
