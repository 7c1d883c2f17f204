//! Discovery Protocol (§4.8): `ServiceQuery`/`FileQuery` flooding with
//! bounded TTL, LRU dedup, and per-originator rate limiting. Responders
//! verify the query's signature (origin not impersonated) but do not
//! consult the Trust Store — discovery is intentionally cheap.

use crate::dedup::DedupCache;
use crate::error::{DiscoveryError, Result};
use crate::rate_limit::RateLimiter;
use mesh_core::canonical;
use mesh_core::crypto;
use mesh_core::types::{FileOffer, FileQuery, ServiceOffer, ServiceQuery};
use mesh_net::framing::{Frame, FrameType};
use mesh_net::peer::PeerId;
use mesh_net::transport::{PeerEvent, TransportAdapter};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// How long an originator waits for offers before deciding (§4.8).
pub const DEFAULT_RESPONSE_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct DiscoveryConfig {
    pub dedup_capacity: usize,
    pub rate_limit: crate::rate_limit::RateLimitConfig,
    pub response_window: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: crate::dedup::DEFAULT_CAPACITY,
            rate_limit: crate::rate_limit::RateLimitConfig::default(),
            response_window: DEFAULT_RESPONSE_WINDOW,
        }
    }
}

/// What a node should do with a just-received query (§4.8's forwarding
/// rule): forward it on (decrementing `ttlHops`) or drop it silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardDecision {
    Forward,
    Drop,
}

pub struct Discovery {
    transport: Arc<dyn TransportAdapter>,
    dedup: DedupCache,
    rate_limiter: RateLimiter,
    config: DiscoveryConfig,
}

impl Discovery {
    pub fn new(transport: Arc<dyn TransportAdapter>, config: DiscoveryConfig) -> Self {
        Self {
            transport,
            dedup: DedupCache::new(config.dedup_capacity),
            rate_limiter: RateLimiter::new(config.rate_limit),
            config,
        }
    }

    /// Decide whether an inbound `ServiceQuery` should be re-broadcast
    /// with `ttlHops` decremented, after checking its signature, the
    /// dedup cache, and the originator's rate limit.
    pub fn admit_service_query(&self, query: &ServiceQuery, now_ms: u64) -> Result<ForwardDecision> {
        verify_query_signature(query, &query.signer_public_key)?;
        self.admit(query.query_id, &query.requester_ephemeral_pub_key, query.ttl_hops, now_ms)
    }

    pub fn admit_file_query(&self, query: &FileQuery, now_ms: u64) -> Result<ForwardDecision> {
        verify_query_signature(query, &query.signer_public_key)?;
        self.admit(query.query_id, &query.signer_public_key, query.ttl_hops, now_ms)
    }

    fn admit(&self, query_id: Uuid, originator: &str, ttl_hops: u8, now_ms: u64) -> Result<ForwardDecision> {
        if !self.dedup.observe(query_id) {
            return Ok(ForwardDecision::Drop);
        }
        if !self.rate_limiter.check(originator, now_ms) {
            return Err(DiscoveryError::RateLimited(originator.to_string()));
        }
        if ttl_hops == 0 {
            return Ok(ForwardDecision::Drop);
        }
        Ok(ForwardDecision::Forward)
    }

    /// Re-broadcast a `ServiceQuery` with `ttlHops` decremented by one.
    pub async fn forward_service_query(&self, mut query: ServiceQuery) -> Result<()> {
        query.ttl_hops = query.ttl_hops.saturating_sub(1);
        let payload = canonical::canonical_bytes(&query)
            .map_err(|e| DiscoveryError::Canonical(e.to_string()))?;
        self.transport
            .broadcast(Frame::new(FrameType::ServiceQuery, payload))
            .await
            .ok();
        Ok(())
    }

    pub async fn forward_file_query(&self, mut query: FileQuery) -> Result<()> {
        query.ttl_hops = query.ttl_hops.saturating_sub(1);
        let payload = canonical::canonical_bytes(&query)
            .map_err(|e| DiscoveryError::Canonical(e.to_string()))?;
        self.transport
            .broadcast(Frame::new(FrameType::FileQuery, payload))
            .await
            .ok();
        Ok(())
    }

    /// Broadcast a fresh `ServiceQuery` and collect `ServiceOffer`s that
    /// name its `queryId` until the response window elapses.
    pub async fn query_services(&self, query: ServiceQuery) -> Result<Vec<ServiceOffer>> {
        let query_id = query.query_id;
        let mut events = self.transport.subscribe();
        let payload = canonical::canonical_bytes(&query)
            .map_err(|e| DiscoveryError::Canonical(e.to_string()))?;
        self.transport
            .broadcast(Frame::new(FrameType::ServiceQuery, payload))
            .await
            .ok();

        let mut offers = Vec::new();
        let _ = tokio::time::timeout(self.config.response_window, async {
            loop {
                match events.recv().await {
                    Ok(PeerEvent::FrameReceived(_, frame)) if frame.frame_type == FrameType::ServiceOffer => {
                        if let Ok(offer) = serde_json::from_slice::<ServiceOffer>(&frame.payload) {
                            if offer.query_id == query_id {
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

    pub async fn query_files(&self, query: FileQuery) -> Result<Vec<FileOffer>> {
        let query_id = query.query_id;
        let mut events = self.transport.subscribe();
        let payload = canonical::canonical_bytes(&query)
            .map_err(|e| DiscoveryError::Canonical(e.to_string()))?;
        self.transport
            .broadcast(Frame::new(FrameType::FileQuery, payload))
            .await
            .ok();

        let mut offers = Vec::new();
        let _ = tokio::time::timeout(self.config.response_window, async {
            loop {
                match events.recv().await {
                    Ok(PeerEvent::FrameReceived(_, frame)) if frame.frame_type == FrameType::FileOffer => {
                        if let Ok(offer) = serde_json::from_slice::<FileOffer>(&frame.payload) {
                            if offer.query_id == query_id {
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

    /// Unicast a signed response back toward a query's originator.
    pub async fn respond_service(&self, originator: PeerId, offer: &ServiceOffer) -> Result<()> {
        let payload = canonical::canonical_bytes(offer).map_err(|e| DiscoveryError::Canonical(e.to_string()))?;
        self.transport
            .unicast_send(originator, Frame::new(FrameType::ServiceOffer, payload))
            .await
            .ok();
        Ok(())
    }

    pub async fn respond_file(&self, originator: PeerId, offer: &FileOffer) -> Result<()> {
        let payload = canonical::canonical_bytes(offer).map_err(|e| DiscoveryError::Canonical(e.to_string()))?;
        self.transport
            .unicast_send(originator, Frame::new(FrameType::FileOffer, payload))
            .await
            .ok();
        Ok(())
    }
}

/// Verify a query's signature covers its claimed signer, without
/// consulting the Trust Store (§4.8: discovery does not gate on trust).
fn verify_query_signature<T: serde::Serialize>(record: &T, signer_pub_key: &str) -> Result<()> {
    let value = serde_json::to_value(record).map_err(|e| DiscoveryError::Canonical(e.to_string()))?;
    let stripped = canonical::strip_fields(&value, &["signature", "signerPublicKey"]);
    let bytes = canonical::canonicalize(&stripped).map_err(|e| DiscoveryError::Canonical(e.to_string()))?;

    let signature = value
        .get("signature")
        .and_then(|v| v.as_str())
        .ok_or(DiscoveryError::InvalidSignature)?;

    let ok = crypto::verify_encoded(signer_pub_key, &bytes, signature)
        .map_err(|_| DiscoveryError::InvalidSignature)?;
    if ok {
        Ok(())
    } else {
        Err(DiscoveryError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::crypto::KeyPair;
    use mesh_net::transport::LoopbackNetwork;

    fn signed_service_query(keypair: &KeyPair, ttl_hops: u8) -> ServiceQuery {
        let mut query = ServiceQuery {
            query_id: Uuid::new_v4(),
            filter: serde_json::json!({}),
            ttl_hops,
            requester_ephemeral_pub_key: keypair.public_key_encoded(),
            signer_public_key: String::new(),
            signature: String::new(),
        };
        let value = serde_json::to_value(&query).unwrap();
        let stripped = canonical::strip_fields(&value, &["signature", "signerPublicKey"]);
        let bytes = canonical::canonicalize(&stripped).unwrap();
        let signature = keypair.sign(&bytes);
        query.signature = crypto::encode_signature(&signature);
        query.signer_public_key = keypair.public_key_encoded();
        query
    }

    fn discovery() -> Discovery {
        let network = LoopbackNetwork::new();
        let transport = Arc::new(network.join(PeerId::from_public_key_encoded("me")));
        Discovery::new(transport, DiscoveryConfig::default())
    }

    #[test]
    fn admits_fresh_query_with_valid_signature() {
        let keypair = KeyPair::generate();
        let query = signed_service_query(&keypair, 4);
        let d = discovery();
        assert_eq!(d.admit_service_query(&query, 0).unwrap(), ForwardDecision::Forward);
    }

    #[test]
    fn rejects_tampered_query() {
        let keypair = KeyPair::generate();
        let mut query = signed_service_query(&keypair, 4);
        query.filter = serde_json::json!({"tampered": true});
        let d = discovery();
        assert!(d.admit_service_query(&query, 0).is_err());
    }

    #[test]
    fn drops_duplicate_query_id() {
        let keypair = KeyPair::generate();
        let query = signed_service_query(&keypair, 4);
        let d = discovery();
        assert_eq!(d.admit_service_query(&query, 0).unwrap(), ForwardDecision::Forward);
        assert_eq!(d.admit_service_query(&query, 0).unwrap(), ForwardDecision::Drop);
    }

    #[test]
    fn drops_when_ttl_exhausted() {
        let keypair = KeyPair::generate();
        let query = signed_service_query(&keypair, 0);
        let d = discovery();
        assert_eq!(d.admit_service_query(&query, 0).unwrap(), ForwardDecision::Drop);
    }

    #[test]
    fn rate_limits_repeated_originator() {
        let d = discovery();
        let keypair = KeyPair::generate();
        for _ in 0..10 {
            let query = signed_service_query(&keypair, 4);
            assert!(d.admit_service_query(&query, 0).is_ok());
        }
        let query = signed_service_query(&keypair, 4);
        assert!(matches!(d.admit_service_query(&query, 0), Err(DiscoveryError::RateLimited(_))));
    }
}
