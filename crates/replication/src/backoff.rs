//! Retry/backoff schedule for upload attempts (§4.7): exponential with
//! jitter, base 2s, capped at 5 minutes, bounded attempts per (job, peer).

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 2_000,
            cap_ms: 300_000,
            max_attempts: 4,
        }
    }
}

/// Delay before attempt number `attempt` (1-indexed), full exponential
/// backoff with jitter drawn uniformly from `[0, computed_delay]`.
pub fn backoff_delay_ms(attempt: u32, config: &BackoffConfig) -> u64 {
    let exponent = attempt.saturating_sub(1).min(20);
    let unjittered = config.base_ms.saturating_mul(1u64 << exponent).min(config.cap_ms);
    if unjittered == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=unjittered)
}

pub fn attempts_exhausted(attempts: u32, config: &BackoffConfig) -> bool {
    attempts >= config.max_attempts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_never_exceeds_cap() {
        let config = BackoffConfig::default();
        for attempt in 1..10 {
            assert!(backoff_delay_ms(attempt, &config) <= config.cap_ms);
        }
    }

    #[test]
    fn delay_grows_with_attempt_number_on_average() {
        let config = BackoffConfig::default();
        // Not a tight bound (jitter), just confirms the ceiling scales up.
        let cap_at_1 = config.base_ms;
        let cap_at_3 = config.base_ms * 4;
        assert!(backoff_delay_ms(1, &config) <= cap_at_1);
        assert!(backoff_delay_ms(3, &config) <= cap_at_3);
    }

    #[test]
    fn max_attempts_respected() {
        let config = BackoffConfig::default();
        assert!(!attempts_exhausted(3, &config));
        assert!(attempts_exhausted(4, &config));
    }
}
