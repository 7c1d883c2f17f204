//! Dispatch/Negotiation (§4.9): the query→offer→assignment→receipt
//! workflow. The external sandbox executor that actually runs a task
//! (§4.9 step 7) is out of scope (§1) and modeled here as a trait the
//! caller supplies, the same way `mesh-net::TransportAdapter` stands in
//! for a concrete transport.

use crate::error::{DispatchError, Result};
use crate::fitness::{fitness_score, FitnessConfig, FitnessInputs};
use crate::selection::{select_best, RankedOffer};
use async_trait::async_trait;
use mesh_core::canonical;
use mesh_core::crypto::{self, KeyPair};
use mesh_core::types::{
    Assignment, BlobId, CancelAssignment, DelegationToken, Offer, ReceiptAction, ReceiptEntry,
    ScopeKind, TaskConstraints, TaskRequest,
};
use mesh_net::framing::{Frame, FrameType};
use mesh_net::peer::{PeerId, PeerRecord};
use mesh_net::transport::{PeerEvent, TransportAdapter};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use trust_store::TrustStore;
use uuid::Uuid;
use verifier::{VerificationRequest, Verifier};

pub const DEFAULT_TTL_HOPS: u8 = 4;
pub const DEFAULT_OFFER_COLLECT_WINDOW: Duration = Duration::from_secs(3);
pub const DEFAULT_ASSIGNMENT_RETRIES: u32 = 2;

/// The caller's sandboxed task runner (§4.9 step 7/8), external to this
/// crate. Returns the output blob id on success.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task_id: Uuid, service_id: &str, inputs: &[BlobId]) -> Result<BlobId>;
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    pub ttl_hops: u8,
    pub offer_collect_window: Duration,
    pub fitness_threshold: f64,
    pub fitness: FitnessConfig,
    pub max_assignment_retries: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            ttl_hops: DEFAULT_TTL_HOPS,
            offer_collect_window: DEFAULT_OFFER_COLLECT_WINDOW,
            fitness_threshold: 0.2,
            fitness: FitnessConfig::default(),
            max_assignment_retries: DEFAULT_ASSIGNMENT_RETRIES,
        }
    }
}

pub struct Dispatch {
    transport: Arc<dyn TransportAdapter>,
    trust: Arc<TrustStore>,
    verifier: Arc<Verifier>,
    signer: KeyPair,
    config: DispatchConfig,
}

impl Dispatch {
    pub fn new(
        transport: Arc<dyn TransportAdapter>,
        trust: Arc<TrustStore>,
        verifier: Arc<Verifier>,
        signer: KeyPair,
        config: DispatchConfig,
    ) -> Self {
        Self {
            transport,
            trust,
            verifier,
            signer,
            config,
        }
    }

    /// §4.9 steps 1-2: build and broadcast a signed `TaskRequest`, with an
    /// ephemeral signer authorized by a delegation chain from the
    /// requester's long-term key.
    pub fn build_task_request(
        &self,
        service_id: String,
        inputs: Vec<BlobId>,
        constraints: TaskConstraints,
        ephemeral: &KeyPair,
        delegation_chain: Vec<DelegationToken>,
        now_ms: u64,
        ttl_ms: u64,
    ) -> Result<TaskRequest> {
        let mut request = TaskRequest {
            task_id: Uuid::new_v4(),
            service_id,
            inputs,
            constraints,
            requester_ephemeral_pub_key: ephemeral.public_key_encoded(),
            delegation_chain,
            nonce: Uuid::new_v4().to_string(),
            expires_at_ms: now_ms + ttl_ms,
            signer_public_key: String::new(),
            signature: String::new(),
        };
        let (signature, signer_public_key) = sign(&request, ephemeral)?;
        request.signature = signature;
        request.signer_public_key = signer_public_key;
        Ok(request)
    }

    /// §4.9 steps 2-4: broadcast the request and collect signed `Offer`s
    /// for `task_id` until the collection window elapses.
    pub async fn broadcast_and_collect_offers(&self, request: &TaskRequest) -> Result<Vec<Offer>> {
        let task_id = request.task_id;
        let mut events = self.transport.subscribe();
        let payload = canonical::canonical_bytes(request).map_err(|e| DispatchError::Canonical(e.to_string()))?;
        self.transport
            .broadcast(Frame::new(FrameType::TaskRequest, payload))
            .await
            .ok();

        let mut offers = Vec::new();
        let _ = tokio::time::timeout(self.config.offer_collect_window, async {
            loop {
                match events.recv().await {
                    Ok(PeerEvent::FrameReceived(_, frame)) if frame.frame_type == FrameType::Offer => {
                        if let Ok(offer) = serde_json::from_slice::<Offer>(&frame.payload) {
                            if offer.task_id == task_id {
                                offers.push(offer);
                            }
                        }
                    }
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        })
        .await;

        Ok(offers)
    }

    /// §4.9 step 3: an executor's side of the workflow — evaluate local
    /// fitness against `request` and, if above `fitness_threshold`, build
    /// a signed `Offer`. Returns `None` when fitness is below threshold
    /// (the executor should simply not respond).
    pub fn evaluate_offer(
        &self,
        request: &TaskRequest,
        inputs: FitnessInputs,
        ephemeral: &KeyPair,
        delegation_chain: Vec<DelegationToken>,
        resource_reservation: serde_json::Value,
        now_ms: u64,
        ttl_ms: u64,
    ) -> Result<Option<Offer>> {
        let score = fitness_score(&inputs, &self.config.fitness);
        if score < self.config.fitness_threshold {
            return Ok(None);
        }

        let mut offer = Offer {
            task_id: request.task_id,
            offerer_ephemeral_pub_key: ephemeral.public_key_encoded(),
            delegation_chain,
            fitness_score: score,
            resource_reservation,
            expires_at_ms: now_ms + ttl_ms,
            signer_public_key: String::new(),
            signature: String::new(),
        };
        let (signature, signer_public_key) = sign(&offer, ephemeral)?;
        offer.signature = signature;
        offer.signer_public_key = signer_public_key;
        Ok(Some(offer))
    }

    /// Verify one offer's signature/delegation chain and resolve the
    /// long-term key it acts on behalf of (self-signed if no chain).
    pub fn verify_offer(&self, offer: &Offer, now_ms: u64) -> Result<String> {
        let raw = serde_json::to_value(offer).map_err(|e| DispatchError::Canonical(e.to_string()))?;
        let subject = offer
            .delegation_chain
            .first()
            .map(|link| link.issuer_pub_key.clone())
            .unwrap_or_else(|| offer.offerer_ephemeral_pub_key.clone());

        let outcome = self
            .verifier
            .verify(
                &VerificationRequest {
                    raw: &raw,
                    subject_pub_key: &subject,
                    delegation_chain: &offer.delegation_chain,
                    replay_id: offer.task_id,
                    issued_at_ms: 0,
                    expires_at_ms: offer.expires_at_ms,
                    required_scope: if offer.delegation_chain.is_empty() {
                        None
                    } else {
                        Some((ScopeKind::ResourceOffer, None))
                    },
                    challenge_nonce: None,
                },
                now_ms,
            )
            .map_err(|e| DispatchError::VerificationFailed(e.to_string()))?;
        Ok(outcome.subject_pub_key)
    }

    /// §4.9 step 5: rank verified offers by the spec's ordering rule and
    /// select the winner. `peers` supplies hop distance for each offer's
    /// resolved long-term key; peers with no known record default to hop
    /// distance 1 (treated as a direct neighbor).
    pub fn select_winner(&self, offers: &[Offer], peers: &[PeerRecord], now_ms: u64) -> Result<Offer> {
        let peers_by_key: HashMap<&str, &PeerRecord> =
            peers.iter().map(|p| (p.pub_key_encoded.as_str(), p)).collect();

        let mut ranked = Vec::new();
        for offer in offers {
            let Ok(subject) = self.verify_offer(offer, now_ms) else { continue };
            let trust_score = self.trust.trust_score(&subject).unwrap_or(0.0);
            let hop_distance = peers_by_key.get(subject.as_str()).map(|p| p.hop_distance).unwrap_or(1);
            ranked.push(RankedOffer {
                offer: offer.clone(),
                fitness_score: offer.fitness_score,
                hop_distance,
                trust_score,
                node_id: subject,
            });
        }

        select_best(&ranked).ok_or(DispatchError::NoEligibleOffers)
    }

    /// §4.9 step 6: issue a signed `Assignment` to the winner with a
    /// fresh challenge nonce.
    pub fn issue_assignment(&self, winner: &Offer, now_ms: u64) -> Result<Assignment> {
        let nonce = self.verifier.issue_challenge(&winner.offerer_ephemeral_pub_key, now_ms);
        let mut assignment = Assignment {
            task_id: winner.task_id,
            selected_offerer_pub_key: winner.offerer_ephemeral_pub_key.clone(),
            challenge_nonce: nonce,
            issued_at_ms: now_ms,
            signer_public_key: String::new(),
            signature: String::new(),
        };
        let (signature, signer_public_key) = sign(&assignment, &self.signer)?;
        assignment.signature = signature;
        assignment.signer_public_key = signer_public_key;
        Ok(assignment)
    }

    /// A losing offerer's optional "not selected" receipt (§4.9 step 6).
    pub fn not_selected_receipt(&self, offer: &Offer, requester_pub_key: &str, now_ms: u64) -> Result<ReceiptEntry> {
        let mut receipt = ReceiptEntry {
            uploader_pub_key: requester_pub_key.to_string(),
            blob_id: BlobId(offer.task_id.to_string()),
            action: ReceiptAction::NotSelected,
            peer_pub_key: Some(offer.offerer_ephemeral_pub_key.clone()),
            timestamp_ms: now_ms,
            signer_public_key: String::new(),
            signature: String::new(),
        };
        let (signature, signer_public_key) = sign(&receipt, &self.signer)?;
        receipt.signature = signature;
        receipt.signer_public_key = signer_public_key;
        Ok(receipt)
    }

    /// §4.9 step 7: the winner's side — verify the Assignment (challenge
    /// nonce, subject binding to its own ephemeral key) before doing any
    /// work.
    pub fn verify_assignment(&self, assignment: &Assignment, our_ephemeral_pub_key: &str, now_ms: u64) -> Result<()> {
        if assignment.selected_offerer_pub_key != our_ephemeral_pub_key {
            return Err(DispatchError::VerificationFailed("assignment names a different offerer".into()));
        }
        let raw = serde_json::to_value(assignment).map_err(|e| DispatchError::Canonical(e.to_string()))?;
        self.verifier
            .verify(
                &VerificationRequest {
                    raw: &raw,
                    subject_pub_key: &assignment.signer_public_key,
                    delegation_chain: &[],
                    replay_id: assignment.task_id,
                    issued_at_ms: assignment.issued_at_ms,
                    expires_at_ms: assignment.issued_at_ms + self.config.offer_collect_window.as_millis() as u64,
                    required_scope: None,
                    challenge_nonce: Some(&assignment.challenge_nonce),
                },
                now_ms,
            )
            .map_err(|e| DispatchError::VerificationFailed(e.to_string()))?;
        Ok(())
    }

    /// §4.9 step 9: drive execution with bounded reissue to the
    /// next-best offer on failure.
    pub async fn execute_with_retries(
        &self,
        executor: &dyn TaskExecutor,
        request: &TaskRequest,
        ranked_offers: &[Offer],
        peers: &[PeerRecord],
        now_ms: u64,
    ) -> Result<BlobId> {
        let mut remaining: Vec<Offer> = ranked_offers.to_vec();
        let mut attempts = 0;

        loop {
            if remaining.is_empty() {
                return Err(DispatchError::NoEligibleOffers);
            }
            let winner = self.select_winner(&remaining, peers, now_ms)?;
            match executor.execute(request.task_id, &request.service_id, &request.inputs).await {
                Ok(blob_id) => return Ok(blob_id),
                Err(e) => {
                    attempts += 1;
                    if attempts > self.config.max_assignment_retries {
                        return Err(e);
                    }
                    remaining.retain(|o| o.offerer_ephemeral_pub_key != winner.offerer_ephemeral_pub_key);
                }
            }
        }
    }

    /// §4.9 step 6/9: a signed `CancelAssignment` before execution
    /// completes.
    pub fn cancel_assignment(&self, task_id: Uuid, reason: Option<String>, now_ms: u64) -> Result<CancelAssignment> {
        let mut cancel = CancelAssignment {
            task_id,
            reason,
            issued_at_ms: now_ms,
            signer_public_key: String::new(),
            signature: String::new(),
        };
        let (signature, signer_public_key) = sign(&cancel, &self.signer)?;
        cancel.signature = signature;
        cancel.signer_public_key = signer_public_key;
        Ok(cancel)
    }

    /// Broadcast an already-signed `CancelAssignment` (§4.9 step 6/9,
    /// spec.md scenario S5: a role demoted mid-task must hard-cancel it).
    pub async fn broadcast_cancel_assignment(&self, cancel: &CancelAssignment) -> Result<()> {
        let payload = canonical::canonical_bytes(cancel).map_err(|e| DispatchError::Canonical(e.to_string()))?;
        self.transport
            .broadcast(Frame::new(FrameType::CancelAssignment, payload))
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))
    }

    pub fn our_id(&self) -> PeerId {
        self.transport.our_id()
    }
}

fn sign<T: serde::Serialize>(record: &T, signer: &KeyPair) -> Result<(String, String)> {
    let value = serde_json::to_value(record).map_err(|e| DispatchError::Canonical(e.to_string()))?;
    let stripped = canonical::strip_fields(&value, &["signature", "signerPublicKey"]);
    let bytes = canonical::canonicalize(&stripped).map_err(|e| DispatchError::Canonical(e.to_string()))?;
    let signature = signer.sign(&bytes);
    Ok((crypto::encode_signature(&signature), signer.public_key_encoded()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::types::{ResultSink, ThermalState};
    use mesh_core::PowerHint;
    use mesh_net::transport::LoopbackNetwork;
    use tempfile::tempdir;

    fn trust_store() -> Arc<TrustStore> {
        let dir = tempdir().unwrap();
        TrustStore::open(dir.path().join("trust.db")).unwrap()
    }

    fn dispatch() -> Dispatch {
        let trust = trust_store();
        let verifier = Arc::new(Verifier::new(trust.clone(), verifier::VerifierConfig::default()));
        let network = LoopbackNetwork::new();
        let transport = Arc::new(network.join(PeerId::from_public_key_encoded("requester")));
        Dispatch::new(transport, trust, verifier, KeyPair::generate(), DispatchConfig::default())
    }

    fn constraints() -> TaskConstraints {
        TaskConstraints {
            max_latency_ms: None,
            result_sink: ResultSink::BlobWrite,
        }
    }

    fn healthy_power() -> PowerHint {
        PowerHint {
            battery_percent: 90.0,
            charging: true,
            thermal: ThermalState::Cool,
        }
    }

    #[test]
    fn build_task_request_signs_with_ephemeral_key() {
        let d = dispatch();
        let ephemeral = KeyPair::generate();
        let request = d
            .build_task_request(
                "svc".into(),
                vec![],
                constraints(),
                &ephemeral,
                vec![],
                0,
                10_000,
            )
            .unwrap();
        assert_eq!(request.signer_public_key, ephemeral.public_key_encoded());
    }

    #[test]
    fn evaluate_offer_below_threshold_is_none() {
        let d = dispatch();
        let ephemeral = KeyPair::generate();
        let request = d
            .build_task_request("svc".into(), vec![], constraints(), &ephemeral, vec![], 0, 10_000)
            .unwrap();

        let weak_power = PowerHint {
            battery_percent: 5.0,
            charging: false,
            thermal: ThermalState::Hot,
        };
        let inputs = FitnessInputs {
            cpu_avail: 0.1,
            mem_avail: 0.1,
            power: weak_power,
            hop_distance: 5,
            trust_score: 0.1,
        };
        let offer = d
            .evaluate_offer(&request, inputs, &ephemeral, vec![], serde_json::json!({}), 0, 10_000)
            .unwrap();
        assert!(offer.is_none());
    }

    #[test]
    fn select_winner_picks_highest_fitness() {
        let d = dispatch();
        let requester_ephemeral = KeyPair::generate();
        let request = d
            .build_task_request("svc".into(), vec![], constraints(), &requester_ephemeral, vec![], 0, 10_000)
            .unwrap();

        let weak = KeyPair::generate();
        let strong = KeyPair::generate();
        let inputs_weak = FitnessInputs {
            cpu_avail: 0.3,
            mem_avail: 0.3,
            power: healthy_power(),
            hop_distance: 1,
            trust_score: 0.5,
        };
        let inputs_strong = FitnessInputs {
            cpu_avail: 0.9,
            mem_avail: 0.9,
            power: healthy_power(),
            hop_distance: 1,
            trust_score: 0.5,
        };
        let offer_weak = d
            .evaluate_offer(&request, inputs_weak, &weak, vec![], serde_json::json!({}), 0, 10_000)
            .unwrap()
            .unwrap();
        let offer_strong = d
            .evaluate_offer(&request, inputs_strong, &strong, vec![], serde_json::json!({}), 0, 10_000)
            .unwrap()
            .unwrap();

        let winner = d.select_winner(&[offer_weak, offer_strong.clone()], &[], 0).unwrap();
        assert_eq!(winner.offerer_ephemeral_pub_key, offer_strong.offerer_ephemeral_pub_key);
    }

    #[test]
    fn assignment_challenge_must_be_consumed_once() {
        let d = dispatch();
        let requester_ephemeral = KeyPair::generate();
        let request = d
            .build_task_request("svc".into(), vec![], constraints(), &requester_ephemeral, vec![], 0, 10_000)
            .unwrap();
        let winner_ephemeral = KeyPair::generate();
        let inputs = FitnessInputs {
            cpu_avail: 0.8,
            mem_avail: 0.8,
            power: healthy_power(),
            hop_distance: 1,
            trust_score: 0.5,
        };
        let offer = d
            .evaluate_offer(&request, inputs, &winner_ephemeral, vec![], serde_json::json!({}), 0, 10_000)
            .unwrap()
            .unwrap();

        let assignment = d.issue_assignment(&offer, 0).unwrap();
        assert!(d
            .verify_assignment(&assignment, &winner_ephemeral.public_key_encoded(), 10)
            .is_ok());
        // Re-verifying the same assignment must fail: the nonce is
        // one-shot and the replay id (task_id) has already been seen.
        assert!(d
            .verify_assignment(&assignment, &winner_ephemeral.public_key_encoded(), 20)
            .is_err());
    }
}
