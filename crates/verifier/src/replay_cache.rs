//! tokenId replay cache (§4.5 step 7): a sliding window over the maximum
//! token TTL. The spec describes a bloom filter fronting an exact set;
//! this implementation keeps only the exact set; a bloom filter would
//! only help if memory for the full window were a problem, which it is
//! not at the cache sizes this mesh runs at (§4.11 caps the token cache
//! at 10,000 entries).

use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

pub struct ReplayCache {
    seen: Mutex<HashMap<Uuid, u64>>,
    window_ms: u64,
    max_entries: usize,
}

impl ReplayCache {
    pub fn new(window_ms: u64, max_entries: usize) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            window_ms,
            max_entries,
        }
    }

    /// Returns `true` if `token_id` had not been seen within the window
    /// and is now recorded; `false` if it is a replay. First-accepted
    /// wins (§4.5 tie-break rule).
    pub fn check_and_insert(&self, token_id: Uuid, now_ms: u64) -> bool {
        let mut seen = self.seen.lock();
        self.prune_locked(&mut seen, now_ms);

        if let Some(expiry) = seen.get(&token_id) {
            if *expiry > now_ms {
                return false;
            }
        }
        seen.insert(token_id, now_ms + self.window_ms);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune_locked(&self, seen: &mut HashMap<Uuid, u64>, now_ms: u64) {
        if seen.len() < self.max_entries {
            return;
        }
        seen.retain(|_, expiry| *expiry > now_ms);
    }
}
