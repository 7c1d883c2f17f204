//! Trust Store (§4.4): TOFU key observations, endorsement graph,
//! receipt-derived reputation, and the revocation set.

use crate::error::{Result, TrustStoreError};
use mesh_core::types::{
    Endorsement, KeyObservation, ReceiptAction, ReceiptEntry, ReceiptsSummary,
    RevocationAnnouncement,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Weights for the reputation formula (§4.4):
/// `score = a*successRate + b*bytesServedLog + c*endorsementWeight`.
/// The spec leaves these unweighted defaults to policy; see DESIGN.md's
/// Open Question Decisions for the chosen defaults.
#[derive(Debug, Clone, Copy)]
pub struct TrustScoreWeights {
    pub success_rate: f64,
    pub bytes_served_log: f64,
    pub endorsement: f64,
}

impl Default for TrustScoreWeights {
    fn default() -> Self {
        Self {
            success_rate: 0.5,
            bytes_served_log: 0.3,
            endorsement: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrustStoreConfig {
    pub weights: TrustScoreWeights,
    /// Endorsement chain depth limit (§4.4, default 3).
    pub max_endorsement_depth: u32,
    /// Bytes-served value treated as "fully saturated" for the log term.
    pub bytes_served_log_cap: f64,
}

impl Default for TrustStoreConfig {
    fn default() -> Self {
        Self {
            weights: TrustScoreWeights::default(),
            max_endorsement_depth: 3,
            bytes_served_log_cap: 1_000_000_000.0,
        }
    }
}

/// Durable, single-writer-per-key store of trust observations.
///
/// Backed by `sled` — the same append-structured-with-compaction storage
/// the rest of this lineage uses for its event log, satisfying §4.4's
/// durability requirement without re-implementing log compaction.
pub struct TrustStore {
    db: sled::Db,
    observations: sled::Tree,
    revocations: sled::Tree,
    config: TrustStoreConfig,
    // Single-writer discipline: all mutating operations take this lock,
    // even though individual sled operations are already atomic, so that
    // read-modify-write sequences (record_receipt, add_endorsement) don't
    // race each other.
    write_lock: Mutex<()>,
}

impl TrustStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Arc<Self>> {
        Self::open_with_config(path, TrustStoreConfig::default())
    }

    pub fn open_with_config(
        path: impl AsRef<std::path::Path>,
        config: TrustStoreConfig,
    ) -> Result<Arc<Self>> {
        let db = sled::open(path)?;
        let observations = db.open_tree("observations")?;
        let revocations = db.open_tree("revocations")?;
        Ok(Arc::new(Self {
            db,
            observations,
            revocations,
            config,
            write_lock: Mutex::new(()),
        }))
    }

    /// Trust-On-First-Use: record a key at minimal reputation if unseen.
    /// Idempotent.
    pub fn observe(&self, pub_key: &str, now_ms: u64) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.observations.contains_key(pub_key)? {
            return Ok(());
        }
        let observation = KeyObservation {
            pub_key: pub_key.to_string(),
            first_seen_ms: now_ms,
            endorsements: Vec::new(),
            receipts_summary: ReceiptsSummary::default(),
            reputation: 0.0,
            revoked: false,
        };
        self.put_observation(&observation)?;
        Ok(())
    }

    /// Apply a verified receipt to the subject's reputation counters.
    /// `NotSelected` receipts are neutral and do not move the score.
    pub fn record_receipt(&self, receipt: &ReceiptEntry, now_ms: u64) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.ensure_observed_locked(&receipt.uploader_pub_key, now_ms)?;
        let mut observation = self.get_observation(&receipt.uploader_pub_key)?.expect("just observed");

        match receipt.action {
            ReceiptAction::BlobStored
            | ReceiptAction::ReplicationConfirmed
            | ReceiptAction::TaskCompleted => {
                observation.receipts_summary.success_count += 1;
            }
            ReceiptAction::TaskFailed => {
                observation.receipts_summary.failure_count += 1;
            }
            ReceiptAction::NotSelected => {}
        }

        observation.reputation = self.compute_score(&observation, self.config.max_endorsement_depth)?;
        self.put_observation(&observation)
    }

    /// Record bytes actually transferred by a peer, used by the
    /// bytesServedLog term of the reputation formula.
    pub fn record_bytes_served(&self, pub_key: &str, bytes: u64, now_ms: u64) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.ensure_observed_locked(pub_key, now_ms)?;
        let mut observation = self.get_observation(pub_key)?.expect("just observed");
        observation.receipts_summary.bytes_served =
            observation.receipts_summary.bytes_served.saturating_add(bytes);
        observation.reputation = self.compute_score(&observation, self.config.max_endorsement_depth)?;
        self.put_observation(&observation)
    }

    /// Record a signed endorsement edge (endorser -> endorsed). The
    /// caller is responsible for signature verification before calling
    /// this (the Trust Store does not verify signatures itself).
    pub fn add_endorsement(&self, endorsement: Endorsement, now_ms: u64) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.ensure_observed_locked(&endorsement.endorser_pub_key, now_ms)?;
        self.ensure_observed_locked(&endorsement.endorsed_pub_key, now_ms)?;

        let mut observation = self
            .get_observation(&endorsement.endorsed_pub_key)?
            .expect("just observed");
        observation.endorsements.push(endorsement);
        observation.reputation = self.compute_score(&observation, self.config.max_endorsement_depth)?;
        self.put_observation(&observation)
    }

    pub fn revoke(&self, announcement: RevocationAnnouncement) -> Result<()> {
        let _guard = self.write_lock.lock();
        let key = announcement.revoked_pub_key.clone();
        let bytes = serde_json::to_vec(&announcement)?;
        self.revocations.insert(key.as_bytes(), bytes)?;
        if let Some(mut observation) = self.get_observation(&key)? {
            observation.revoked = true;
            self.put_observation(&observation)?;
        }
        Ok(())
    }

    pub fn is_revoked(&self, pub_key: &str) -> Result<bool> {
        Ok(self.revocations.contains_key(pub_key.as_bytes())?)
    }

    pub fn get_observation(&self, pub_key: &str) -> Result<Option<KeyObservation>> {
        match self.observations.get(pub_key.as_bytes())? {
            Some(bytes) => {
                let observation: KeyObservation = serde_json::from_slice(&bytes)
                    .map_err(|e| TrustStoreError::StoreCorrupt(e.to_string()))?;
                Ok(Some(observation))
            }
            None => Ok(None),
        }
    }

    /// Pure function of the stored observation graph: the current
    /// reputation score in `[0, 1]`. Returns 0.0 for unobserved keys.
    pub fn trust_score(&self, pub_key: &str) -> Result<f64> {
        match self.get_observation(pub_key)? {
            Some(observation) => self.compute_score(&observation, self.config.max_endorsement_depth),
            None => Ok(0.0),
        }
    }

    pub fn compact(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn ensure_observed_locked(&self, pub_key: &str, now_ms: u64) -> Result<()> {
        if !self.observations.contains_key(pub_key)? {
            let observation = KeyObservation {
                pub_key: pub_key.to_string(),
                first_seen_ms: now_ms,
                endorsements: Vec::new(),
                receipts_summary: ReceiptsSummary::default(),
                reputation: 0.0,
                revoked: false,
            };
            self.put_observation(&observation)?;
        }
        Ok(())
    }

    fn put_observation(&self, observation: &KeyObservation) -> Result<()> {
        let bytes = serde_json::to_vec(observation)?;
        self.observations.insert(observation.pub_key.as_bytes(), bytes)?;
        Ok(())
    }

    fn compute_score(&self, observation: &KeyObservation, depth: u32) -> Result<f64> {
        let summary = &observation.receipts_summary;
        let total = summary.success_count + summary.failure_count;
        let success_rate = if total == 0 {
            0.5 // neutral prior for a key with no receipts yet
        } else {
            summary.success_count as f64 / total as f64
        };

        let bytes_served_log = if summary.bytes_served == 0 {
            0.0
        } else {
            (((summary.bytes_served as f64).ln() + 1.0) / (self.config.bytes_served_log_cap.ln() + 1.0))
                .clamp(0.0, 1.0)
        };

        let endorsement_weight = if depth == 0 || observation.endorsements.is_empty() {
            0.0
        } else {
            let mut sum = 0.0;
            for endorsement in &observation.endorsements {
                sum += match self.get_observation(&endorsement.endorser_pub_key)? {
                    Some(endorser) => self.compute_score(&endorser, depth - 1)?,
                    None => 0.0,
                };
            }
            (sum / observation.endorsements.len() as f64).clamp(0.0, 1.0)
        };

        let weights = self.config.weights;
        let score = weights.success_rate * success_rate
            + weights.bytes_served_log * bytes_served_log
            + weights.endorsement * endorsement_weight;
        Ok(score.clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::types::Endorsement;
    use tempfile::tempdir;

    fn store() -> Arc<TrustStore> {
        let dir = tempdir().unwrap();
        TrustStore::open(dir.path()).unwrap()
    }

    fn receipt(uploader: &str, action: ReceiptAction) -> ReceiptEntry {
        ReceiptEntry {
            uploader_pub_key: uploader.into(),
            blob_id: mesh_core::types::BlobId("deadbeef".into()),
            action,
            peer_pub_key: None,
            timestamp_ms: 1,
            signer_public_key: uploader.into(),
            signature: "sig".into(),
        }
    }

    #[test]
    fn observe_is_idempotent() {
        let store = store();
        store.observe("alice", 100).unwrap();
        store.observe("alice", 200).unwrap();
        let observation = store.get_observation("alice").unwrap().unwrap();
        assert_eq!(observation.first_seen_ms, 100);
    }

    #[test]
    fn unknown_key_has_zero_trust() {
        let store = store();
        assert_eq!(store.trust_score("nobody").unwrap(), 0.0);
    }

    #[test]
    fn successful_receipts_raise_trust_above_neutral() {
        let store = store();
        for _ in 0..5 {
            store
                .record_receipt(&receipt("alice", ReceiptAction::TaskCompleted), 1)
                .unwrap();
        }
        let score = store.trust_score("alice").unwrap();
        assert!(score > 0.5 * TrustScoreWeights::default().success_rate);
    }

    #[test]
    fn failures_lower_trust_relative_to_successes() {
        let store = store();
        store
            .record_receipt(&receipt("bob", ReceiptAction::TaskCompleted), 1)
            .unwrap();
        let after_success = store.trust_score("bob").unwrap();
        for _ in 0..5 {
            store
                .record_receipt(&receipt("bob", ReceiptAction::TaskFailed), 1)
                .unwrap();
        }
        let after_failures = store.trust_score("bob").unwrap();
        assert!(after_failures < after_success);
    }

    #[test]
    fn endorsement_contributes_to_score() {
        let store = store();
        store.observe("endorser", 1).unwrap();
        store
            .record_receipt(&receipt("endorser", ReceiptAction::TaskCompleted), 1)
            .unwrap();
        store.observe("carol", 1).unwrap();

        let before = store.trust_score("carol").unwrap();
        store
            .add_endorsement(
                Endorsement {
                    endorser_pub_key: "endorser".into(),
                    endorsed_pub_key: "carol".into(),
                    issued_at_ms: 1,
                    signer_public_key: "endorser".into(),
                    signature: "sig".into(),
                },
                1,
            )
            .unwrap();
        let after = store.trust_score("carol").unwrap();
        assert!(after >= before);
    }

    #[test]
    fn endorsement_depth_limit_cuts_cycles() {
        let store = store();
        store.observe("a", 1).unwrap();
        store.observe("b", 1).unwrap();
        store
            .add_endorsement(
                Endorsement {
                    endorser_pub_key: "b".into(),
                    endorsed_pub_key: "a".into(),
                    issued_at_ms: 1,
                    signer_public_key: "b".into(),
                    signature: "sig".into(),
                },
                1,
            )
            .unwrap();
        store
            .add_endorsement(
                Endorsement {
                    endorser_pub_key: "a".into(),
                    endorsed_pub_key: "b".into(),
                    issued_at_ms: 1,
                    signer_public_key: "a".into(),
                    signature: "sig".into(),
                },
                1,
            )
            .unwrap();
        // Would recurse forever without the depth cap; just must terminate
        // and stay within [0, 1].
        let score = store.trust_score("a").unwrap();
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn revocation_is_observable_and_sticky() {
        let store = store();
        store.observe("mallory", 1).unwrap();
        assert!(!store.is_revoked("mallory").unwrap());

        store
            .revoke(RevocationAnnouncement {
                revoked_pub_key: "mallory".into(),
                effective_at_ms: 1,
                reason: Some("compromised".into()),
                signer_public_key: "mallory".into(),
                signature: "sig".into(),
            })
            .unwrap();

        assert!(store.is_revoked("mallory").unwrap());
        assert!(store.get_observation("mallory").unwrap().unwrap().revoked);
    }
}
