//! The normative ten-step verification algorithm (§4.5).

use crate::challenge::ChallengeStore;
use crate::error::{Result, VerifierError};
use crate::replay_cache::ReplayCache;
use mesh_core::canonical;
use mesh_core::token::{validate_capability_token, TokenTtlConfig};
use mesh_core::types::{CapabilityToken, Scope, ScopeKind, Subject};
use serde_json::Value;
use std::sync::Arc;
use trust_store::TrustStore;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub clock_skew_ms: u64,
    pub max_chain_depth: usize,
    /// Minimum trust score required of the acting subject (§4.5 step 10).
    /// 0.0 disables the gate; callers that need a stricter bar for a
    /// specific operation class pass it explicitly via
    /// [`Verifier::verify`]'s `min_trust` override... see that method.
    pub min_trust_threshold: f64,
    pub token_ttl: TokenTtlConfig,
    pub replay_window_ms: u64,
    pub replay_cache_capacity: usize,
    pub challenge_ttl_ms: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            clock_skew_ms: 60_000,
            max_chain_depth: 4,
            min_trust_threshold: 0.0,
            token_ttl: TokenTtlConfig::default(),
            replay_window_ms: TokenTtlConfig::default().delegation_ms,
            replay_cache_capacity: 10_000,
            challenge_ttl_ms: 30_000,
        }
    }
}

/// Everything the Verifier needs about one signed payload. The caller
/// assembles this from whichever typed wire struct it received; the
/// Verifier itself never guesses field names out of a dynamic payload.
pub struct VerificationRequest<'a> {
    /// The full signed JSON object, including `signature` and
    /// `signerPublicKey`.
    pub raw: &'a Value,
    /// The long-term key this operation claims to act on behalf of. Equal
    /// to the signer for a self-signed (non-delegated) operation.
    pub subject_pub_key: &'a str,
    /// Root-to-leaf delegation chain, empty for self-signed operations.
    pub delegation_chain: &'a [CapabilityToken],
    /// Unique id consulted by the replay cache (a token's `tokenId`, or a
    /// task/query id for non-token messages).
    pub replay_id: Uuid,
    pub issued_at_ms: u64,
    pub expires_at_ms: u64,
    pub required_scope: Option<(ScopeKind, Option<&'a str>)>,
    pub challenge_nonce: Option<&'a str>,
}

pub struct VerificationOutcome {
    pub subject_pub_key: String,
    pub scope: Option<Scope>,
}

pub struct Verifier {
    trust: Arc<TrustStore>,
    replay: ReplayCache,
    challenges: ChallengeStore,
    config: VerifierConfig,
}

impl Verifier {
    pub fn new(trust: Arc<TrustStore>, config: VerifierConfig) -> Self {
        let replay = ReplayCache::new(config.replay_window_ms, config.replay_cache_capacity);
        let challenges = ChallengeStore::new(config.challenge_ttl_ms);
        Self {
            trust,
            replay,
            challenges,
            config,
        }
    }

    pub fn issue_challenge(&self, subject_pub_key: &str, now_ms: u64) -> String {
        self.challenges.issue(subject_pub_key, now_ms)
    }

    /// Run the full algorithm against one signed payload.
    pub fn verify(&self, req: &VerificationRequest, now_ms: u64) -> Result<VerificationOutcome> {
        // Steps 1-4: parse (already done by caller), strip signature
        // fields, canonicalize, verify the cryptographic signature.
        let signer_pub_key = self.verify_raw_signature(req.raw, None)?;

        // Step 5: self-signed, or authorized via a delegation chain
        // rooted at the claimed subject.
        let scope = if signer_pub_key == req.subject_pub_key {
            None
        } else {
            Some(self.verify_delegation_chain(
                req.delegation_chain,
                &signer_pub_key,
                req.subject_pub_key,
                now_ms,
            )?)
        };

        // Step 6: expiry with clock skew tolerance.
        if req.issued_at_ms > now_ms + self.config.clock_skew_ms {
            return Err(VerifierError::Expired);
        }
        if req.expires_at_ms + self.config.clock_skew_ms < now_ms {
            return Err(VerifierError::Expired);
        }

        // Step 7: replay cache.
        if !self.replay.check_and_insert(req.replay_id, now_ms) {
            return Err(VerifierError::Replay);
        }

        // Step 8: scope match.
        if let Some((expected_kind, expected_resource)) = req.required_scope {
            match &scope {
                Some(granted) => {
                    if granted.kind != expected_kind {
                        return Err(VerifierError::ScopeMismatch);
                    }
                    if let Some(resource) = expected_resource {
                        if granted.resource_id.as_deref() != Some(resource) {
                            return Err(VerifierError::ScopeMismatch);
                        }
                    }
                }
                // A self-signed operation (the owner acting under its own
                // long-term key) is not exercising a granted capability
                // and is exempt from scope matching.
                None => {}
            }
        }

        // Step 9: challenge-response for critical operations.
        if let Some(nonce) = req.challenge_nonce {
            if !self.challenges.consume(req.subject_pub_key, nonce, now_ms) {
                return Err(VerifierError::ChallengeRequired);
            }
        }

        // Step 10: revocation and trust threshold.
        if self
            .trust
            .is_revoked(req.subject_pub_key)
            .map_err(|e| VerifierError::MissingFields(e.to_string()))?
        {
            return Err(VerifierError::Revoked);
        }
        let score = self
            .trust
            .trust_score(req.subject_pub_key)
            .map_err(|e| VerifierError::MissingFields(e.to_string()))?;
        if score < self.config.min_trust_threshold {
            return Err(VerifierError::TrustTooLow);
        }

        Ok(VerificationOutcome {
            subject_pub_key: req.subject_pub_key.to_string(),
            scope,
        })
    }

    /// Verify a bare capability token on its own (structural rules plus
    /// signature), without the context of an enclosing message. Used to
    /// validate a delegation link in isolation and by callers that accept
    /// standalone `TokenEnvelope` messages.
    pub fn verify_capability_token(&self, token: &CapabilityToken, now_ms: u64) -> Result<()> {
        validate_capability_token(token, &self.config.token_ttl)
            .map_err(|e| VerifierError::MissingFields(e.to_string()))?;
        let value = serde_json::to_value(token).map_err(|e| VerifierError::MissingFields(e.to_string()))?;
        let signer = self.verify_raw_signature(&value, Some(&token.issuer_pub_key))?;
        if signer != token.issuer_pub_key {
            return Err(VerifierError::SignatureInvalid);
        }
        if token.expires_at_ms + self.config.clock_skew_ms < now_ms {
            return Err(VerifierError::Expired);
        }
        Ok(())
    }

    /// Steps 2-4: strip `signature`/`signerPublicKey`, canonicalize, and
    /// verify. Returns the signer's public key on success. If
    /// `expected_signer` is given, the payload's `signerPublicKey` field
    /// must match it.
    fn verify_raw_signature(&self, raw: &Value, expected_signer: Option<&str>) -> Result<String> {
        let signer_pub_key = raw
            .get("signerPublicKey")
            .and_then(Value::as_str)
            .ok_or_else(|| VerifierError::MissingFields("signerPublicKey".into()))?
            .to_string();
        let signature = raw
            .get("signature")
            .and_then(Value::as_str)
            .ok_or_else(|| VerifierError::MissingFields("signature".into()))?;

        if let Some(expected) = expected_signer {
            if expected != signer_pub_key {
                return Err(VerifierError::SignatureInvalid);
            }
        }

        let stripped = canonical::strip_fields(raw, &["signature", "signerPublicKey"]);
        let bytes = canonical::canonicalize(&stripped).map_err(|_| VerifierError::SignatureInvalid)?;

        let ok = mesh_core::crypto::verify_encoded(&signer_pub_key, &bytes, signature)
            .map_err(|_| VerifierError::SignatureInvalid)?;
        if !ok {
            return Err(VerifierError::SignatureInvalid);
        }
        Ok(signer_pub_key)
    }

    /// §4.5 step 5: validate a root-to-leaf delegation chain, capped at
    /// `max_chain_depth`, and return the scope granted at the leaf.
    fn verify_delegation_chain(
        &self,
        chain: &[CapabilityToken],
        leaf_signer: &str,
        root_subject: &str,
        now_ms: u64,
    ) -> Result<Scope> {
        if chain.is_empty() || chain.len() > self.config.max_chain_depth {
            return Err(VerifierError::DelegationChainBroken);
        }
        if chain[0].issuer_pub_key != root_subject {
            return Err(VerifierError::DelegationChainBroken);
        }

        // The chain's root issuer is the subject's own long-term key. If
        // the Trust Store has never seen it, TOFU-record it at minimal
        // trust rather than rejecting the chain outright (§4.5 step 5).
        self.trust
            .observe(root_subject, now_ms)
            .map_err(|e| VerifierError::MissingFields(e.to_string()))?;

        for (i, link) in chain.iter().enumerate() {
            self.verify_capability_token(link, now_ms)
                .map_err(|_| VerifierError::DelegationChainBroken)?;

            let expected_subject = match &link.subject_pub_key {
                Subject::Key(key) => key.clone(),
                Subject::Any => {
                    if i + 1 < chain.len() {
                        return Err(VerifierError::DelegationChainBroken);
                    }
                    leaf_signer.to_string()
                }
            };

            if i + 1 < chain.len() {
                if expected_subject != chain[i + 1].issuer_pub_key {
                    return Err(VerifierError::DelegationChainBroken);
                }
            } else if expected_subject != leaf_signer {
                return Err(VerifierError::DelegationChainBroken);
            }
        }

        Ok(chain.last().expect("checked non-empty above").scope.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::crypto::{self, KeyPair};
    use mesh_core::types::{Scope, ScopeKind, Subject};
    use serde_json::json;
    use tempfile::tempdir;

    fn trust_store() -> Arc<TrustStore> {
        let dir = tempdir().unwrap();
        TrustStore::open(dir.path()).unwrap()
    }

    fn sign_value(keypair: &KeyPair, mut value: Value) -> Value {
        let stripped = canonical::strip_fields(&value, &["signature", "signerPublicKey"]);
        let bytes = canonical::canonicalize(&stripped).unwrap();
        let signature = keypair.sign(&bytes);
        value["signature"] = json!(crypto::encode_signature(&signature));
        value["signerPublicKey"] = json!(keypair.public_key_encoded());
        value
    }

    #[test]
    fn self_signed_payload_verifies() {
        let verifier = Verifier::new(trust_store(), VerifierConfig::default());
        let keypair = KeyPair::generate();
        let subject = keypair.public_key_encoded();

        let raw = sign_value(&keypair, json!({"payload": "hello"}));
        let req = VerificationRequest {
            raw: &raw,
            subject_pub_key: &subject,
            delegation_chain: &[],
            replay_id: Uuid::new_v4(),
            issued_at_ms: 0,
            expires_at_ms: 10_000,
            required_scope: None,
            challenge_nonce: None,
        };

        let outcome = verifier.verify(&req, 100).unwrap();
        assert_eq!(outcome.subject_pub_key, subject);
    }

    #[test]
    fn tampered_payload_fails_signature_check() {
        let verifier = Verifier::new(trust_store(), VerifierConfig::default());
        let keypair = KeyPair::generate();
        let subject = keypair.public_key_encoded();

        let mut raw = sign_value(&keypair, json!({"payload": "hello"}));
        raw["payload"] = json!("tampered");

        let req = VerificationRequest {
            raw: &raw,
            subject_pub_key: &subject,
            delegation_chain: &[],
            replay_id: Uuid::new_v4(),
            issued_at_ms: 0,
            expires_at_ms: 10_000,
            required_scope: None,
            challenge_nonce: None,
        };

        assert_eq!(verifier.verify(&req, 100).unwrap_err(), VerifierError::SignatureInvalid);
    }

    #[test]
    fn replayed_id_rejected_on_second_use() {
        let verifier = Verifier::new(trust_store(), VerifierConfig::default());
        let keypair = KeyPair::generate();
        let subject = keypair.public_key_encoded();
        let raw = sign_value(&keypair, json!({"payload": "hello"}));
        let replay_id = Uuid::new_v4();

        let req = VerificationRequest {
            raw: &raw,
            subject_pub_key: &subject,
            delegation_chain: &[],
            replay_id,
            issued_at_ms: 0,
            expires_at_ms: 10_000,
            required_scope: None,
            challenge_nonce: None,
        };
        assert!(verifier.verify(&req, 100).is_ok());
        assert_eq!(verifier.verify(&req, 101).unwrap_err(), VerifierError::Replay);
    }

    #[test]
    fn expired_payload_rejected() {
        let verifier = Verifier::new(trust_store(), VerifierConfig::default());
        let keypair = KeyPair::generate();
        let subject = keypair.public_key_encoded();
        let raw = sign_value(&keypair, json!({"payload": "hello"}));

        let req = VerificationRequest {
            raw: &raw,
            subject_pub_key: &subject,
            delegation_chain: &[],
            replay_id: Uuid::new_v4(),
            issued_at_ms: 0,
            expires_at_ms: 1_000,
            required_scope: None,
            challenge_nonce: None,
        };
        assert_eq!(
            verifier.verify(&req, 1_000_000).unwrap_err(),
            VerifierError::Expired
        );
    }

    fn delegation_link(issuer: &KeyPair, subject_pub_key: String, kind: ScopeKind) -> CapabilityToken {
        let token = CapabilityToken {
            token_id: Uuid::new_v4(),
            issuer_pub_key: issuer.public_key_encoded(),
            subject_pub_key: Subject::Key(subject_pub_key),
            issued_at_ms: 0,
            expires_at_ms: 500_000,
            scope: Scope {
                kind,
                resource_id: None,
                max_bytes: None,
                limits: None,
            },
            nonce: "n".into(),
            signer_public_key: String::new(),
            signature: String::new(),
        };
        let value = sign_value(issuer, serde_json::to_value(&token).unwrap());
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn delegated_payload_verifies_through_chain() {
        let verifier = Verifier::new(trust_store(), VerifierConfig::default());
        let owner = KeyPair::generate();
        let ephemeral = KeyPair::generate();
        let owner_key = owner.public_key_encoded();

        let delegation = delegation_link(&owner, ephemeral.public_key_encoded(), ScopeKind::Delegate);
        let chain = vec![delegation];

        let raw = sign_value(&ephemeral, json!({"payload": "do-the-thing"}));
        let req = VerificationRequest {
            raw: &raw,
            subject_pub_key: &owner_key,
            delegation_chain: &chain,
            replay_id: Uuid::new_v4(),
            issued_at_ms: 0,
            expires_at_ms: 10_000,
            required_scope: None,
            challenge_nonce: None,
        };

        let outcome = verifier.verify(&req, 100).unwrap();
        assert_eq!(outcome.subject_pub_key, owner_key);
        assert_eq!(outcome.scope.unwrap().kind, ScopeKind::Delegate);
    }

    #[test]
    fn unrecognized_chain_root_is_tofu_observed() {
        let trust = trust_store();
        let verifier = Verifier::new(trust.clone(), VerifierConfig::default());
        let owner = KeyPair::generate();
        let ephemeral = KeyPair::generate();
        let owner_key = owner.public_key_encoded();

        assert!(trust.get_observation(&owner_key).unwrap().is_none());

        let delegation = delegation_link(&owner, ephemeral.public_key_encoded(), ScopeKind::Delegate);
        let chain = vec![delegation];
        let raw = sign_value(&ephemeral, json!({"payload": "do-the-thing"}));
        let req = VerificationRequest {
            raw: &raw,
            subject_pub_key: &owner_key,
            delegation_chain: &chain,
            replay_id: Uuid::new_v4(),
            issued_at_ms: 0,
            expires_at_ms: 10_000,
            required_scope: None,
            challenge_nonce: None,
        };

        verifier.verify(&req, 100).unwrap();

        assert!(trust.get_observation(&owner_key).unwrap().is_some());
    }

    #[test]
    fn chain_broken_when_subjects_dont_link() {
        let verifier = Verifier::new(trust_store(), VerifierConfig::default());
        let owner = KeyPair::generate();
        let stranger = KeyPair::generate();
        let ephemeral = KeyPair::generate();
        let owner_key = owner.public_key_encoded();

        // Delegation names `stranger` as subject, but the message is
        // actually signed by `ephemeral`.
        let delegation = delegation_link(&owner, stranger.public_key_encoded(), ScopeKind::Delegate);
        let chain = vec![delegation];

        let raw = sign_value(&ephemeral, json!({"payload": "do-the-thing"}));
        let req = VerificationRequest {
            raw: &raw,
            subject_pub_key: &owner_key,
            delegation_chain: &chain,
            replay_id: Uuid::new_v4(),
            issued_at_ms: 0,
            expires_at_ms: 10_000,
            required_scope: None,
            challenge_nonce: None,
        };

        assert_eq!(
            verifier.verify(&req, 100).unwrap_err(),
            VerifierError::DelegationChainBroken
        );
    }

    #[test]
    fn challenge_must_be_issued_before_critical_operation_succeeds() {
        let verifier = Verifier::new(trust_store(), VerifierConfig::default());
        let keypair = KeyPair::generate();
        let subject = keypair.public_key_encoded();
        let raw = sign_value(&keypair, json!({"payload": "critical"}));

        let req_no_challenge = VerificationRequest {
            raw: &raw,
            subject_pub_key: &subject,
            delegation_chain: &[],
            replay_id: Uuid::new_v4(),
            issued_at_ms: 0,
            expires_at_ms: 10_000,
            required_scope: None,
            challenge_nonce: Some("not-issued"),
        };
        assert_eq!(
            verifier.verify(&req_no_challenge, 100).unwrap_err(),
            VerifierError::ChallengeRequired
        );

        let nonce = verifier.issue_challenge(&subject, 50);
        let req_with_challenge = VerificationRequest {
            replay_id: Uuid::new_v4(),
            challenge_nonce: Some(&nonce),
            ..req_no_challenge
        };
        assert!(verifier.verify(&req_with_challenge, 100).is_ok());
    }
}
