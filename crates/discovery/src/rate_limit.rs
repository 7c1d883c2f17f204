//! Per-originator rate limiting (§4.8): fixed-window token bucket, default
//! 10 queries/minute per originator public key. Grounded on
//! `gossipd::membership::MembershipManager`'s window-reset counter, with
//! the window expressed in explicit milliseconds rather than `Instant` so
//! the policy is deterministically testable.

use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_per_window: u32,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: 10,
            window_ms: 60_000,
        }
    }
}

struct WindowState {
    count: u32,
    window_start_ms: u64,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, WindowState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Records one query attempt from `originator_pub_key` at `now_ms`,
    /// returning `false` if it exceeds the window's quota.
    pub fn check(&self, originator_pub_key: &str, now_ms: u64) -> bool {
        let mut windows = self.windows.lock();
        let state = windows
            .entry(originator_pub_key.to_string())
            .or_insert(WindowState {
                count: 0,
                window_start_ms: now_ms,
            });

        if now_ms.saturating_sub(state.window_start_ms) >= self.config.window_ms {
            state.count = 0;
            state.window_start_ms = now_ms;
        }

        if state.count >= self.config.max_per_window {
            return false;
        }
        state.count += 1;
        true
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
