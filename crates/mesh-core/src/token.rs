//! Token Model (§4.3): structural validation shared by every component
//! that issues or accepts capability and delegation tokens. The Verifier
//! crate performs the full ten-step algorithm of §4.5; this module covers
//! only the context-free structural rules a token must satisfy on its own.

use crate::error::{Error, Result};
use crate::types::{CapabilityToken, ScopeKind};
use uuid::Uuid;

/// Maximum token lifetime per scope kind, in milliseconds. Defaults match
/// §6's configuration surface (`token.maxTtlMs`).
#[derive(Debug, Clone, Copy)]
pub struct TokenTtlConfig {
    pub capability_ms: u64,
    pub delegation_ms: u64,
    pub assignment_ms: u64,
}

impl Default for TokenTtlConfig {
    fn default() -> Self {
        Self {
            capability_ms: 600_000,
            delegation_ms: 3_600_000,
            assignment_ms: 30_000,
        }
    }
}

impl TokenTtlConfig {
    fn max_ttl_for(&self, kind: ScopeKind) -> u64 {
        match kind {
            ScopeKind::Delegate => self.delegation_ms,
            _ => self.capability_ms,
        }
    }
}

/// Validate the structural invariants of a capability (or delegation)
/// token: ordering of timestamps, TTL cap for its scope kind, and a
/// well-formed UUIDv4 token id.
pub fn validate_capability_token(token: &CapabilityToken, ttl: &TokenTtlConfig) -> Result<()> {
    if token.expires_at_ms <= token.issued_at_ms {
        return Err(Error::InvalidToken(
            "expiresAt must be greater than issuedAt".into(),
        ));
    }

    let lifetime = token.expires_at_ms - token.issued_at_ms;
    let max_ttl = ttl.max_ttl_for(token.scope.kind);
    if lifetime > max_ttl {
        return Err(Error::InvalidToken(format!(
            "token ttl {lifetime}ms exceeds max {max_ttl}ms for scope {:?}",
            token.scope.kind
        )));
    }

    if token.token_id.get_version_num() != 4 {
        return Err(Error::InvalidToken("tokenId must be a UUIDv4".into()));
    }

    Ok(())
}

/// Generate a fresh RFC4122 UUIDv4 token id.
pub fn new_token_id() -> Uuid {
    Uuid::new_v4()
}
