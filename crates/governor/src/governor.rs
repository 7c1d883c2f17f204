//! The Resource Governor (§4.11): the five configurable quotas every
//! other component must consult before spending a shared budget.
//! Callers MUST NOT retry a `QuotaExceeded` without delay (§4.11) — this
//! crate enforces the refusal, not the backoff; see
//! `replication::backoff` for the retry-delay policy callers should
//! apply.

use crate::counters::BoundedCounter;
use crate::error::Result;
use crate::rate_limit::{RateLimitConfig, RateLimiter};

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub storage_bytes_max: u64,
    pub token_cache_entries_max: u64,
    pub inflight_uploads_max: u64,
    pub broadcast_rate_per_min_max: u32,
    pub peer_records_max: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            storage_bytes_max: 5 * 1024 * 1024 * 1024,
            token_cache_entries_max: 10_000,
            inflight_uploads_max: 8,
            broadcast_rate_per_min_max: 30,
            peer_records_max: 2_048,
        }
    }
}

/// Point-in-time snapshot for observability (§4.11's "exposes counters").
#[derive(Debug, Clone, Copy)]
pub struct GovernorCounters {
    pub storage_bytes_used: u64,
    pub storage_bytes_max: u64,
    pub token_cache_entries: u64,
    pub token_cache_entries_max: u64,
    pub inflight_uploads: u64,
    pub inflight_uploads_max: u64,
    pub peer_records: u64,
    pub peer_records_max: u64,
}

pub struct ResourceGovernor {
    storage_bytes: BoundedCounter,
    token_cache_entries: BoundedCounter,
    inflight_uploads: BoundedCounter,
    peer_records: BoundedCounter,
    broadcast_rate: RateLimiter,
}

impl ResourceGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            storage_bytes: BoundedCounter::new("storageBytesMax", config.storage_bytes_max),
            token_cache_entries: BoundedCounter::new("tokenCacheEntriesMax", config.token_cache_entries_max),
            inflight_uploads: BoundedCounter::new("inflightUploadsMax", config.inflight_uploads_max),
            peer_records: BoundedCounter::new("peerRecordsMax", config.peer_records_max),
            broadcast_rate: RateLimiter::new(RateLimitConfig {
                max_per_window: config.broadcast_rate_per_min_max,
                window_ms: 60_000,
            }),
        }
    }

    pub fn try_reserve_storage_bytes(&self, bytes: u64) -> Result<()> {
        self.storage_bytes.try_reserve(bytes)
    }

    pub fn release_storage_bytes(&self, bytes: u64) {
        self.storage_bytes.release(bytes);
    }

    pub fn try_cache_token(&self) -> Result<()> {
        self.token_cache_entries.try_reserve(1)
    }

    pub fn evict_cached_token(&self) {
        self.token_cache_entries.release(1);
    }

    pub fn try_start_upload(&self) -> Result<()> {
        self.inflight_uploads.try_reserve(1)
    }

    pub fn finish_upload(&self) {
        self.inflight_uploads.release(1);
    }

    pub fn try_register_peer(&self) -> Result<()> {
        self.peer_records.try_reserve(1)
    }

    pub fn forget_peer(&self) {
        self.peer_records.release(1);
    }

    /// `false` means the broadcast quota for the current window is
    /// spent; the caller must drop the broadcast, not queue it.
    pub fn try_broadcast(&self, now_ms: u64) -> bool {
        self.broadcast_rate.check(now_ms)
    }

    pub fn counters(&self) -> GovernorCounters {
        GovernorCounters {
            storage_bytes_used: self.storage_bytes.current(),
            storage_bytes_max: self.storage_bytes.max(),
            token_cache_entries: self.token_cache_entries.current(),
            token_cache_entries_max: self.token_cache_entries.max(),
            inflight_uploads: self.inflight_uploads.current(),
            inflight_uploads_max: self.inflight_uploads.max(),
            peer_records: self.peer_records.current(),
            peer_records_max: self.peer_records.max(),
        }
    }
}
