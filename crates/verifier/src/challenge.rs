//! Challenge-response tracking for critical operations (§4.5 step 9): the
//! verifier issues a nonce the subject must cover with its next signature.

use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;

pub struct ChallengeStore {
    // (subject_pub_key, nonce) -> expiry_ms
    pending: Mutex<HashMap<(String, String), u64>>,
    ttl_ms: u64,
}

impl ChallengeStore {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            ttl_ms,
        }
    }

    /// Issue a fresh challenge nonce for `subject_pub_key`.
    pub fn issue(&self, subject_pub_key: &str, now_ms: u64) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let nonce = hex::encode(bytes);

        let mut pending = self.pending.lock();
        pending.retain(|_, expiry| *expiry > now_ms);
        pending.insert((subject_pub_key.to_string(), nonce.clone()), now_ms + self.ttl_ms);
        nonce
    }

    /// One-shot consumption: succeeds at most once per issued nonce.
    pub fn consume(&self, subject_pub_key: &str, nonce: &str, now_ms: u64) -> bool {
        let mut pending = self.pending.lock();
        let key = (subject_pub_key.to_string(), nonce.to_string());
        match pending.remove(&key) {
            Some(expiry) => expiry > now_ms,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_nonce_is_consumable_once() {
        let store = ChallengeStore::new(60_000);
        let nonce = store.issue("alice", 0);
        assert!(store.consume("alice", &nonce, 10));
        assert!(!store.consume("alice", &nonce, 10));
    }

    #[test]
    fn expired_nonce_is_rejected() {
        let store = ChallengeStore::new(1_000);
        let nonce = store.issue("alice", 0);
        assert!(!store.consume("alice", &nonce, 5_000));
    }

    #[test]
    fn wrong_subject_rejected() {
        let store = ChallengeStore::new(60_000);
        let nonce = store.issue("alice", 0);
        assert!(!store.consume("mallory", &nonce, 10));
    }
}
