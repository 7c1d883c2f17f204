use thiserror::Error;

/// Failure modes surfaced to the operator (§4.7).
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("no eligible peers for this blob")]
    NoEligiblePeers,
    #[error("upload failed (transient): {0}")]
    UploadFailedTransient(String),
    #[error("upload failed (fatal): {0}")]
    UploadFailedFatal(String),
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("drop folder store error: {0}")]
    DropStore(#[from] dropstore::DropStoreError),
}

pub type Result<T> = std::result::Result<T, ReplicationError>;
