use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("query signature invalid")]
    InvalidSignature,
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("ttl exhausted")]
    TtlExhausted,
    #[error("canonicalization error: {0}")]
    Canonical(String),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
