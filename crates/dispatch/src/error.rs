use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no offers met the fitness threshold")]
    NoEligibleOffers,
    #[error("verification failed: {0}")]
    VerificationFailed(String),
    #[error("assignment expired")]
    AssignmentExpired,
    #[error("retries exhausted")]
    RetriesExhausted,
    #[error("canonicalization error: {0}")]
    Canonical(String),
    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
