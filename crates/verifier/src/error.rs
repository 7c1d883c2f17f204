use thiserror::Error;

/// Verification failures, named after §4.5/§7's outcome taxonomy.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum VerifierError {
    #[error("missing required field: {0}")]
    MissingFields(String),
    #[error("signature invalid")]
    SignatureInvalid,
    #[error("token expired")]
    Expired,
    #[error("tokenId already seen")]
    Replay,
    #[error("scope does not match requested operation")]
    ScopeMismatch,
    #[error("signer is revoked")]
    Revoked,
    #[error("delegation chain broken or too deep")]
    DelegationChainBroken,
    #[error("trust score below required threshold")]
    TrustTooLow,
    #[error("critical operation requires a satisfied challenge")]
    ChallengeRequired,
}

pub type Result<T> = std::result::Result<T, VerifierError>;
