//! Peer identity and the Peer Record (§3).

use mesh_core::{crypto, Role, PowerHint};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Transport-level peer identity: SHA-256 of the peer's encoded public
/// key. Distinct from the long-term signing key itself — this is a mesh
/// address, not a persistent identity (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    pub fn from_public_key_encoded(encoded: &str) -> Self {
        Self(crypto::hash(encoded.as_bytes()))
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// What we currently believe about a peer: where it is, how far, and what
/// it's willing to do for us.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: PeerId,
    /// The peer's long-term signing key, Base64+DER encoded. `id` is
    /// derived from this; kept alongside it because the Trust Store and
    /// Verifier key everything by the encoded key, not by `PeerId`.
    pub pub_key_encoded: String,
    /// Opaque transport addresses (interpreted by the Transport Adapter).
    pub addrs: Vec<String>,
    pub last_seen_ms: u64,
    pub hop_distance: u32,
    pub current_roles: HashSet<Role>,
    pub capability_flags: HashSet<String>,
    pub power_hint: Option<PowerHint>,
}

impl PeerRecord {
    pub fn new(pub_key_encoded: String, now_ms: u64) -> Self {
        Self {
            id: PeerId::from_public_key_encoded(&pub_key_encoded),
            pub_key_encoded,
            addrs: Vec::new(),
            last_seen_ms: now_ms,
            hop_distance: u32::MAX,
            current_roles: HashSet::new(),
            capability_flags: HashSet::new(),
            power_hint: None,
        }
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_seen_ms = now_ms;
    }

    pub fn has_capability(&self, flag: &str) -> bool {
        self.capability_flags.contains(flag)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.current_roles.contains(&role)
    }

    pub fn is_stale(&self, now_ms: u64, timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen_ms) > timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_stable_for_same_key() {
        let a = PeerId::from_public_key_encoded("same-key");
        let b = PeerId::from_public_key_encoded("same-key");
        assert_eq!(a, b);
    }

    #[test]
    fn staleness_check() {
        let record = PeerRecord::new("peer-key".into(), 1_000);
        assert!(!record.is_stale(1_500, 1_000));
        assert!(record.is_stale(5_000, 1_000));
    }

    #[test]
    fn new_derives_id_from_pub_key() {
        let record = PeerRecord::new("peer-key".into(), 0);
        assert_eq!(record.id, PeerId::from_public_key_encoded("peer-key"));
    }
}
