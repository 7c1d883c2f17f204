use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("hash mismatch: computed {computed}, transmitted {transmitted}")]
    HashMismatch { computed: String, transmitted: String },
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("missing field: {0}")]
    MissingField(String),
}

pub type Result<T> = std::result::Result<T, Error>;
