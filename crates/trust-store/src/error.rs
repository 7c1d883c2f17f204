use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrustStoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store corrupt: {0}")]
    StoreCorrupt(String),
}

pub type Result<T> = std::result::Result<T, TrustStoreError>;
