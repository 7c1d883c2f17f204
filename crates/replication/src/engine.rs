//! Replication Engine (§4.7): for each locally stored blob, selects
//! candidate storage peers, ranks them, drives uploads to
//! `target_replicas` confirmed copies, and persists progress through the
//! Drop Folder Store so a restart resumes rather than re-uploads blindly.

use crate::backoff::{attempts_exhausted, backoff_delay_ms, BackoffConfig};
use crate::error::{ReplicationError, Result};
use crate::scoring::{CandidateStats, Scorer, ScoringWeights};
use dropstore::DropStore;
use mesh_core::canonical;
use mesh_core::crypto::{self, KeyPair};
use mesh_core::types::{
    AssignmentStatus, BlobId, ReplicationAssignment, StorageInventoryQuery, StorageInventoryResponse,
    StorageUploadChunk,
};
use mesh_net::framing::{Frame, FrameType};
use mesh_net::peer::{PeerId, PeerRecord};
use mesh_net::transport::{PeerEvent, TransportAdapter};
use std::sync::Arc;
use std::time::Duration;
use trust_store::TrustStore;

/// Bytes per `StorageUploadChunk` (§6).
pub const MAX_CHUNK_BYTES: usize = 64 * 1024;

/// How long to wait for a `StorageInventoryResponse` before assuming the
/// peer needs the upload (§4.7 idempotence check, scenario S6).
const INVENTORY_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct ReplicationEngineConfig {
    pub concurrency_per_job: usize,
    pub scoring_weights: ScoringWeights,
    pub backoff: BackoffConfig,
    /// Candidates farther than this are excluded outright, not merely
    /// down-ranked (§4.7 candidate selection).
    pub max_hop_distance: u32,
}

impl Default for ReplicationEngineConfig {
    fn default() -> Self {
        Self {
            concurrency_per_job: 3,
            scoring_weights: ScoringWeights::default(),
            backoff: BackoffConfig::default(),
            max_hop_distance: 8,
        }
    }
}

/// Drives replication of locally stored blobs toward their
/// `target_replicas`. Holds no peer table of its own; the caller (the
/// `meshd` runloop) supplies the current peer view each time it asks the
/// engine to advance a job, consistent with §4.13's scheduler owning all
/// mutable peer state.
pub struct ReplicationEngine {
    store: Arc<DropStore>,
    trust: Arc<TrustStore>,
    transport: Arc<dyn TransportAdapter>,
    signer: KeyPair,
    config: ReplicationEngineConfig,
    scorer: Scorer,
}

impl ReplicationEngine {
    pub fn new(
        store: Arc<DropStore>,
        trust: Arc<TrustStore>,
        transport: Arc<dyn TransportAdapter>,
        signer: KeyPair,
        config: ReplicationEngineConfig,
    ) -> Self {
        let scorer = Scorer::new(config.scoring_weights);
        Self {
            store,
            trust,
            transport,
            signer,
            config,
            scorer,
        }
    }

    /// Rank candidate peers for a blob (§4.7's candidate selection rules):
    /// advertise `storage` in their capability flags, are within
    /// `max_hop_distance`, have a power state that permits taking on
    /// storage I/O, and exclude the uploader and any peer already
    /// carrying an assignment for this job; then rank by the composite
    /// score.
    pub fn rank_candidates(
        &self,
        peers: &[PeerRecord],
        uploader_pub_key: &str,
        already_assigned: &[String],
    ) -> Vec<PeerRecord> {
        let candidates: Vec<(PeerRecord, CandidateStats)> = peers
            .iter()
            .filter(|p| p.has_capability("storage"))
            .filter(|p| p.hop_distance <= self.config.max_hop_distance)
            .filter(|p| p.power_hint.map(|h| h.permits_storage()).unwrap_or(true))
            .filter(|p| p.pub_key_encoded != uploader_pub_key)
            .filter(|p| !already_assigned.iter().any(|id| id == &p.pub_key_encoded))
            .map(|p| {
                let trust_score = self.trust.trust_score(&p.pub_key_encoded).unwrap_or(0.0);
                let hop_distance = if p.hop_distance == u32::MAX { 1 } else { p.hop_distance };
                let free_space_hint = p
                    .power_hint
                    .map(|h| if h.charging { 1.0 } else { h.battery_percent / 100.0 })
                    .unwrap_or(0.5);
                let stats = CandidateStats {
                    trust_score,
                    hop_distance,
                    free_space_hint,
                    recent_success_rate: trust_score,
                };
                (p.clone(), stats)
            })
            .collect();

        self.scorer
            .rank(&candidates)
            .into_iter()
            .map(|sc| sc.candidate)
            .collect()
    }

    /// Advance one blob's replication job by one round: top up
    /// assignments up to `target_replicas` minus confirmed/in-flight
    /// copies, then drive each selected peer through the idempotence
    /// check and upload.
    pub async fn advance_job(&self, blob_id: &BlobId, peers: &[PeerRecord], now_ms: u64) -> Result<()> {
        let job = self
            .store
            .read_replication_job(blob_id)
            .await?
            .ok_or(ReplicationError::NoEligiblePeers)?;

        let confirmed = job
            .assignments
            .iter()
            .filter(|a| a.status == AssignmentStatus::Confirmed)
            .count() as u32;
        if confirmed >= job.target_replicas {
            return Ok(());
        }

        let already_assigned: Vec<String> = job
            .assignments
            .iter()
            .filter(|a| !matches!(a.status, AssignmentStatus::Failed { .. }))
            .map(|a| a.node_id.clone())
            .collect();

        let metadata = self
            .store
            .read_metadata(blob_id)
            .await?
            .ok_or(ReplicationError::NoEligiblePeers)?;

        let needed = (job.target_replicas - confirmed) as usize;
        let ranked = self.rank_candidates(peers, &metadata.uploader_pub_key, &already_assigned);
        let selected: Vec<&PeerRecord> = ranked
            .iter()
            .take(needed.min(self.config.concurrency_per_job))
            .collect();

        if selected.is_empty() {
            return Err(ReplicationError::NoEligiblePeers);
        }

        for peer in selected {
            if let Err(e) = self.replicate_to_peer(blob_id, peer, now_ms).await {
                self.store
                    .append_assignment(
                        blob_id,
                        ReplicationAssignment {
                            node_id: peer.pub_key_encoded.clone(),
                            status: AssignmentStatus::Failed { reason: e.to_string() },
                            timestamp_ms: now_ms,
                        },
                    )
                    .await?;
            }
        }

        Ok(())
    }

    /// Drive one peer through §4.7's per-candidate state machine:
    /// `CandidateSelected` → inventory check → (skip if already present,
    /// else `Uploading` → chunked transfer) → `Confirmed`.
    async fn replicate_to_peer(&self, blob_id: &BlobId, peer: &PeerRecord, now_ms: u64) -> Result<()> {
        self.store
            .append_assignment(
                blob_id,
                ReplicationAssignment {
                    node_id: peer.pub_key_encoded.clone(),
                    status: AssignmentStatus::CandidateSelected,
                    timestamp_ms: now_ms,
                },
            )
            .await?;

        if self.query_has_blob(blob_id, peer.id).await? {
            self.store
                .append_assignment(
                    blob_id,
                    ReplicationAssignment {
                        node_id: peer.pub_key_encoded.clone(),
                        status: AssignmentStatus::Confirmed,
                        timestamp_ms: now_ms,
                    },
                )
                .await?;
            return Ok(());
        }

        self.store
            .append_assignment(
                blob_id,
                ReplicationAssignment {
                    node_id: peer.pub_key_encoded.clone(),
                    status: AssignmentStatus::Uploading,
                    timestamp_ms: now_ms,
                },
            )
            .await?;

        self.upload_blob(blob_id, peer.id).await?;

        self.store
            .append_assignment(
                blob_id,
                ReplicationAssignment {
                    node_id: peer.pub_key_encoded.clone(),
                    status: AssignmentStatus::Confirmed,
                    timestamp_ms: now_ms,
                },
            )
            .await?;
        Ok(())
    }

    /// Idempotence check (§4.7 scenario S6): ask the peer whether it
    /// already holds this blob before transferring any bytes. A missing
    /// or malformed response is treated as "not present" rather than as
    /// a hard failure — the upload attempt that follows will surface any
    /// real connectivity problem.
    async fn query_has_blob(&self, blob_id: &BlobId, peer: PeerId) -> Result<bool> {
        let mut query = StorageInventoryQuery {
            blob_id: blob_id.clone(),
            signer_public_key: String::new(),
            signature: String::new(),
        };
        let (signature, signer_public_key) = self.sign(&query)?;
        query.signature = signature;
        query.signer_public_key = signer_public_key;

        let payload = canonical::canonical_bytes(&query).map_err(|e| {
            ReplicationError::UploadFailedFatal(format!("encoding inventory query: {e}"))
        })?;

        let mut events = self.transport.subscribe();
        self.transport
            .unicast_send(peer, Frame::new(FrameType::StorageInventoryQuery, payload))
            .await
            .map_err(|e| ReplicationError::UploadFailedTransient(e.to_string()))?;

        let wait = tokio::time::timeout(INVENTORY_QUERY_TIMEOUT, async {
            loop {
                match events.recv().await {
                    Ok(PeerEvent::FrameReceived(from, frame))
                        if from == peer && frame.frame_type == FrameType::StorageInventoryResponse =>
                    {
                        if let Ok(resp) = serde_json::from_slice::<StorageInventoryResponse>(&frame.payload) {
                            if &resp.blob_id == blob_id {
                                return Some(resp.present);
                            }
                        }
                    }
                    Ok(_) => continue,
                    Err(_) => return None,
                }
            }
        })
        .await;

        Ok(wait.ok().flatten().unwrap_or(false))
    }

    /// Chunked upload of the blob's bytes (§6's `maxChunkBytes` default).
    async fn upload_blob(&self, blob_id: &BlobId, peer: PeerId) -> Result<()> {
        let bytes = self.store.read_blob(blob_id).await?;
        let total_size = bytes.len() as u64;
        let chunks: Vec<&[u8]> = bytes.chunks(MAX_CHUNK_BYTES).collect();

        for (index, data) in chunks.iter().enumerate() {
            let mut chunk = StorageUploadChunk {
                blob_id: blob_id.clone(),
                chunk_index: index as u32,
                total_size: if index == 0 { Some(total_size) } else { None },
                data: data.to_vec(),
                signer_public_key: String::new(),
                signature: String::new(),
            };
            let (signature, signer_public_key) = self.sign(&chunk)?;
            chunk.signature = signature;
            chunk.signer_public_key = signer_public_key;

            let payload = canonical::canonical_bytes(&chunk)
                .map_err(|e| ReplicationError::UploadFailedFatal(format!("encoding chunk: {e}")))?;

            self.transport
                .unicast_send(peer, Frame::new(FrameType::StorageUpload, payload))
                .await
                .map_err(|e| ReplicationError::UploadFailedTransient(e.to_string()))?;
        }

        Ok(())
    }

    fn sign<T: serde::Serialize>(&self, record: &T) -> Result<(String, String)> {
        let value = serde_json::to_value(record)
            .map_err(|e| ReplicationError::UploadFailedFatal(format!("encoding: {e}")))?;
        let stripped = canonical::strip_fields(&value, &["signature", "signerPublicKey"]);
        let bytes = canonical::canonicalize(&stripped)
            .map_err(|e| ReplicationError::UploadFailedFatal(format!("canonicalizing: {e}")))?;
        let signature = self.signer.sign(&bytes);
        Ok((crypto::encode_signature(&signature), self.signer.public_key_encoded()))
    }

    /// Whether a (job, peer) pair should be retried, and how long to wait
    /// first — pure policy, delegated to [`crate::backoff`] so the caller
    /// (the `meshd` runloop) owns the actual scheduling.
    pub fn retry_decision(&self, attempts: u32) -> Option<u64> {
        if attempts_exhausted(attempts, &self.config.backoff) {
            None
        } else {
            Some(backoff_delay_ms(attempts + 1, &self.config.backoff))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::types::Role;
    use mesh_core::PowerHint;
    use mesh_net::transport::LoopbackNetwork;
    use tempfile::tempdir;

    async fn new_store() -> Arc<DropStore> {
        let dir = tempdir().unwrap();
        Arc::new(
            DropStore::open(dir.path().to_path_buf(), dropstore::DropStoreConfig::default())
                .await
                .unwrap(),
        )
    }

    fn new_trust() -> Arc<TrustStore> {
        let dir = tempdir().unwrap();
        TrustStore::open(dir.path().join("trust.db")).unwrap()
    }

    fn storage_peer(key: &str, now_ms: u64) -> PeerRecord {
        let mut peer = PeerRecord::new(key.to_string(), now_ms);
        peer.hop_distance = 1;
        peer.current_roles.insert(Role::StorageNode);
        peer.capability_flags.insert("storage".into());
        peer.power_hint = Some(PowerHint {
            battery_percent: 80.0,
            charging: true,
            thermal: mesh_core::types::ThermalState::Cool,
        });
        peer
    }

    async fn new_engine() -> ReplicationEngine {
        let trust = new_trust();
        let network = LoopbackNetwork::new();
        let transport = Arc::new(network.join(PeerId::from_public_key_encoded("me")));
        ReplicationEngine::new(
            new_store().await,
            trust,
            transport,
            KeyPair::generate(),
            ReplicationEngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn rank_candidates_excludes_uploader_and_non_storage_peers() {
        let engine = new_engine().await;

        let uploader_key = "uploader";
        let mut non_storage = PeerRecord::new("no-storage".into(), 0);
        non_storage.hop_distance = 1;
        let storage = storage_peer("storage-peer", 0);
        let uploader_as_peer = storage_peer(uploader_key, 0);

        let peers = vec![non_storage, storage.clone(), uploader_as_peer];
        let ranked = engine.rank_candidates(&peers, uploader_key, &[]);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].pub_key_encoded, storage.pub_key_encoded);
    }

    #[tokio::test]
    async fn rank_candidates_excludes_already_assigned_peers() {
        let engine = new_engine().await;

        let a = storage_peer("a", 0);
        let b = storage_peer("b", 0);
        let peers = vec![a.clone(), b.clone()];
        let ranked = engine.rank_candidates(&peers, "uploader", &["a".to_string()]);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].pub_key_encoded, "b");
    }

    #[tokio::test]
    async fn rank_candidates_excludes_far_and_power_incapable_peers() {
        let engine = new_engine().await;

        let near = storage_peer("near", 0);
        let mut far = storage_peer("far", 0);
        far.hop_distance = engine.config.max_hop_distance + 1;
        let mut overheated = storage_peer("overheated", 0);
        overheated.power_hint = Some(PowerHint {
            battery_percent: 80.0,
            charging: true,
            thermal: mesh_core::types::ThermalState::Hot,
        });

        let peers = vec![near.clone(), far, overheated];
        let ranked = engine.rank_candidates(&peers, "uploader", &[]);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].pub_key_encoded, near.pub_key_encoded);
    }

    #[tokio::test]
    async fn retry_decision_none_once_attempts_exhausted() {
        let engine = new_engine().await;

        assert!(engine.retry_decision(0).is_some());
        assert!(engine.retry_decision(4).is_none());
    }

    #[tokio::test]
    async fn advance_job_confirms_via_inventory_response_without_transfer() {
        let trust = new_trust();
        let network = LoopbackNetwork::new();
        let uploader = KeyPair::generate();

        let engine_transport = Arc::new(network.join(PeerId::from_public_key_encoded("me")));
        let store = new_store().await;
        let blob_id = store
            .store_blob(b"payload", &uploader, None, vec![], 1_000)
            .await
            .unwrap();

        let peer_key = "storage-peer";
        let peer_transport = network.join(PeerId::from_public_key_encoded(peer_key));
        let mut peer_events = peer_transport.subscribe();

        // The peer responds to any inventory query by claiming it already
        // has the blob, so no StorageUpload chunk should ever be sent.
        tokio::spawn(async move {
            if let Some(PeerEvent::FrameReceived(from, frame)) = peer_events.recv().await.ok() {
                if frame.frame_type == FrameType::StorageInventoryQuery {
                    let query: StorageInventoryQuery = serde_json::from_slice(&frame.payload).unwrap();
                    let response = StorageInventoryResponse {
                        blob_id: query.blob_id,
                        present: true,
                        signer_public_key: String::new(),
                        signature: String::new(),
                    };
                    let payload = serde_json::to_vec(&response).unwrap();
                    let _ = peer_transport
                        .unicast_send(from, Frame::new(FrameType::StorageInventoryResponse, payload))
                        .await;
                }
            }
        });

        let engine = ReplicationEngine::new(
            store.clone(),
            trust,
            engine_transport,
            uploader,
            ReplicationEngineConfig::default(),
        );

        let peer = storage_peer(peer_key, 1_000);
        engine.advance_job(&blob_id, &[peer], 1_000).await.unwrap();

        let job = store.read_replication_job(&blob_id).await.unwrap().unwrap();
        assert_eq!(job.assignments.len(), 2);
        assert_eq!(job.assignments[1].status, AssignmentStatus::Confirmed);
    }
}
