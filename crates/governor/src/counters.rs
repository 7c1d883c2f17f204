//! Bounded counters backing the byte/entry/slot quotas (§4.11). Each one
//! is a plain saturating counter against a configured max; callers
//! release what they reserved when the underlying resource is freed.

use crate::error::{QuotaExceeded, Result};
use parking_lot::Mutex;

pub struct BoundedCounter {
    max: u64,
    current: Mutex<u64>,
    name: &'static str,
}

impl BoundedCounter {
    pub fn new(name: &'static str, max: u64) -> Self {
        Self {
            max,
            current: Mutex::new(0),
            name,
        }
    }

    pub fn try_reserve(&self, amount: u64) -> Result<()> {
        let mut current = self.current.lock();
        if current.saturating_add(amount) > self.max {
            return Err(QuotaExceeded(self.name));
        }
        *current += amount;
        Ok(())
    }

    pub fn release(&self, amount: u64) {
        let mut current = self.current.lock();
        *current = current.saturating_sub(amount);
    }

    pub fn current(&self) -> u64 {
        *self.current.lock()
    }

    pub fn max(&self) -> u64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserves_up_to_max() {
        let counter = BoundedCounter::new("test", 10);
        assert!(counter.try_reserve(6).is_ok());
        assert!(counter.try_reserve(4).is_ok());
        assert_eq!(counter.current(), 10);
    }

    #[test]
    fn rejects_reservation_over_max() {
        let counter = BoundedCounter::new("test", 10);
        counter.try_reserve(8).unwrap();
        assert_eq!(counter.try_reserve(3), Err(QuotaExceeded("test")));
        assert_eq!(counter.current(), 8);
    }

    #[test]
    fn release_frees_capacity_for_further_reservation() {
        let counter = BoundedCounter::new("test", 10);
        counter.try_reserve(10).unwrap();
        assert!(counter.try_reserve(1).is_err());
        counter.release(5);
        assert!(counter.try_reserve(5).is_ok());
    }
}
