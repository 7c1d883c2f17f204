//! Signing, verification, hashing, and public-key encoding primitives.
//!
//! Ed25519 for signatures, SHA-256 for content hashing, Base64-encoded
//! X.509 SubjectPublicKeyInfo (RFC 8410) for public key exchange.

use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Fixed 12-byte SubjectPublicKeyInfo prefix for Ed25519 (RFC 8410):
/// SEQUENCE { SEQUENCE { OID 1.3.101.112 } BIT STRING }, followed by the
/// raw 32-byte public key.
const ED25519_DER_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];
const ED25519_DER_LEN: usize = ED25519_DER_PREFIX.len() + 32;

/// An Ed25519 keypair used to sign protocol messages.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_encoded(&self) -> String {
        encode_public_key(&self.verifying_key())
    }

    pub fn sign(&self, bytes: &[u8]) -> Signature {
        self.signing_key.sign(bytes)
    }
}

/// Verify a signature over `bytes` against a raw Ed25519 public key.
pub fn verify(public_key: &VerifyingKey, bytes: &[u8], signature: &Signature) -> bool {
    public_key.verify(bytes, signature).is_ok()
}

/// Verify a signature given a Base64+DER-encoded public key and a signature
/// encoded the same way sign_encoded produces it.
pub fn verify_encoded(public_key_b64: &str, bytes: &[u8], signature_b64: &str) -> Result<bool> {
    let public_key = decode_public_key(public_key_b64)?;
    let signature = decode_signature(signature_b64)?;
    Ok(verify(&public_key, bytes, &signature))
}

pub fn encode_signature(signature: &Signature) -> String {
    STANDARD.encode(signature.to_bytes())
}

pub fn decode_signature(encoded: &str) -> Result<Signature> {
    let bytes = STANDARD.decode(encoded).map_err(|_| Error::InvalidSignature)?;
    let bytes: [u8; 64] = bytes.try_into().map_err(|_| Error::InvalidSignature)?;
    Ok(Signature::from_bytes(&bytes))
}

/// Encode a public key as Base64 over its X.509 SubjectPublicKeyInfo DER.
pub fn encode_public_key(key: &VerifyingKey) -> String {
    let mut der = Vec::with_capacity(ED25519_DER_LEN);
    der.extend_from_slice(&ED25519_DER_PREFIX);
    der.extend_from_slice(key.as_bytes());
    STANDARD.encode(der)
}

/// Decode a Base64+DER-encoded public key produced by `encode_public_key`.
pub fn decode_public_key(encoded: &str) -> Result<VerifyingKey> {
    let der = STANDARD
        .decode(encoded)
        .map_err(|e| Error::InvalidPublicKey(e.to_string()))?;
    if der.len() != ED25519_DER_LEN || der[..ED25519_DER_PREFIX.len()] != ED25519_DER_PREFIX {
        return Err(Error::InvalidPublicKey(
            "not a 44-byte Ed25519 SubjectPublicKeyInfo".into(),
        ));
    }
    let raw: [u8; 32] = der[ED25519_DER_PREFIX.len()..]
        .try_into()
        .expect("length checked above");
    VerifyingKey::from_bytes(&raw).map_err(|e| Error::InvalidPublicKey(e.to_string()))
}

/// SHA-256 hash of arbitrary bytes.
pub fn hash(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

pub fn hash_hex(bytes: &[u8]) -> String {
    hex::encode(hash(bytes))
}
