use mesh_core::types::BlobId;
use thiserror::Error;

/// Failure modes named in §4.6/§7. I/O errors are classified into the
/// three disk-failure variants by `std::io::ErrorKind` where the kind is
/// informative; anything else falls into `DiskIoError`.
#[derive(Debug, Error)]
pub enum DropStoreError {
    #[error("insufficient disk space")]
    InsufficientSpace,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("disk I/O error: {0}")]
    DiskIoError(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("canonicalization error: {0}")]
    Canonical(String),
    #[error("corrupted blob: computed hash {computed} does not match expected {expected}")]
    HashMismatch { computed: String, expected: String },
    #[error("no replication job recorded for blob {0}")]
    JobNotFound(BlobId),
}

impl From<std::io::Error> for DropStoreError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::StorageFull => DropStoreError::InsufficientSpace,
            std::io::ErrorKind::PermissionDenied => DropStoreError::PermissionDenied(e.to_string()),
            _ => DropStoreError::DiskIoError(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DropStoreError>;
