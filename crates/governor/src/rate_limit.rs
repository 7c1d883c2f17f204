//! Fixed-window global rate limit for `broadcastRatePerMinMax` (§4.11).
//! Same window-reset-on-expiry shape as `discovery::rate_limit`, but
//! global rather than per-originator since broadcast quota is a
//! per-node budget, not a per-peer one.

use parking_lot::Mutex;

pub struct RateLimitConfig {
    pub max_per_window: u32,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: 30,
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
    window: Mutex<Option<WindowState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            window: Mutex::new(None),
        }
    }

    /// Returns `true` and consumes one slot if under the limit.
    pub fn check(&self, now_ms: u64) -> bool {
        let mut window = self.window.lock();
        match window.as_mut() {
            Some(state) if now_ms.saturating_sub(state.window_start_ms) < self.config.window_ms => {
                if state.count >= self.config.max_per_window {
                    false
                } else {
                    state.count += 1;
                    true
                }
            }
            _ => {
                *window = Some(WindowState {
                    count: 1,
                    window_start_ms: now_ms,
                });
                true
            }
        }
    }
}
