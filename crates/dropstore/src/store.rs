//! Drop Folder Store (§4.6): the durable write pipeline and on-disk layout
//! of §6 — `<blobId>.blob`, `<blobId>.json`, `<blobId>.repl.json`,
//! `receipts.txt`, and a `tmp/` staging area. Every write lands in `tmp/`
//! first, is fsynced, then atomically renamed into place, so readers never
//! observe a partial blob or partial metadata.

use crate::error::{DropStoreError, Result};
use mesh_core::canonical;
use mesh_core::crypto::{self, KeyPair};
use mesh_core::types::{
    BlobId, MetadataRecord, ReceiptAction, ReceiptEntry, ReplicationAssignment, ReplicationJob,
};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct DropStoreConfig {
    pub target_replication_factor: u32,
}

impl Default for DropStoreConfig {
    fn default() -> Self {
        Self {
            target_replication_factor: 3,
        }
    }
}

/// Owns exclusive write access to one drop folder root. Multiple readers
/// may read concurrently; writes within a folder are serialized by the
/// caller (the Replication Engine and `meshd` route all writes through a
/// single task, per §5's "exclusive single-writer, multiple-reader").
pub struct DropStore {
    root: PathBuf,
    config: DropStoreConfig,
}

impl DropStore {
    pub async fn open(root: impl Into<PathBuf>, config: DropStoreConfig) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("tmp")).await?;
        Ok(Self { root, config })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tmp_path(&self) -> PathBuf {
        self.root.join("tmp").join(Uuid::new_v4().to_string())
    }

    fn blob_path(&self, id: &BlobId) -> PathBuf {
        self.root.join(format!("{id}.blob"))
    }

    fn meta_path(&self, id: &BlobId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn repl_path(&self, id: &BlobId) -> PathBuf {
        self.root.join(format!("{id}.repl.json"))
    }

    pub fn receipts_path(&self) -> PathBuf {
        self.root.join("receipts.txt")
    }

    /// Write bytes to a temp file, fsync, then atomically rename to their
    /// content-addressed final path (§4.6 steps 1-3).
    pub async fn write_blob(&self, bytes: &[u8]) -> Result<BlobId> {
        let blob_id = BlobId::from_hash(&crypto::hash(bytes));
        self.write_through_tmp(bytes, &self.blob_path(&blob_id)).await?;
        Ok(blob_id)
    }

    /// Read a blob back, verifying its bytes still hash to its filename
    /// stem (§8's universal invariant).
    pub async fn read_blob(&self, blob_id: &BlobId) -> Result<Vec<u8>> {
        let bytes = tokio::fs::read(self.blob_path(blob_id)).await?;
        let computed = BlobId::from_hash(&crypto::hash(&bytes));
        if &computed != blob_id {
            return Err(DropStoreError::HashMismatch {
                computed: computed.0,
                expected: blob_id.0.clone(),
            });
        }
        Ok(bytes)
    }

    /// Sign and write `<blobId>.json` through the same temp+fsync+rename
    /// pattern (§4.6 step 4).
    pub async fn write_metadata(&self, mut record: MetadataRecord, signer: &KeyPair) -> Result<()> {
        let (signature, signer_public_key) = sign_record(&record, signer)?;
        record.signature = signature;
        record.signer_public_key = signer_public_key;

        let bytes = serde_json::to_vec(&record)?;
        let path = self.meta_path(&record.blob_id);
        self.write_through_tmp(&bytes, &path).await
    }

    pub async fn read_metadata(&self, blob_id: &BlobId) -> Result<Option<MetadataRecord>> {
        read_json_optional(&self.meta_path(blob_id)).await
    }

    /// Create (or update, preserving any existing assignments) the
    /// replication job file for a freshly-written blob (§4.6 step 5).
    pub async fn write_replication_job(&self, blob_id: &BlobId) -> Result<()> {
        let existing = self.read_replication_job(blob_id).await?;
        let assignments = existing.map(|j| j.assignments).unwrap_or_default();
        let job = ReplicationJob {
            blob_path: format!("{blob_id}.blob"),
            meta_path: format!("{blob_id}.json"),
            target_replicas: self.config.target_replication_factor,
            attempts: 0,
            assignments,
            last_error: None,
        };
        self.write_replication_job_raw(blob_id, &job).await
    }

    pub async fn write_replication_job_raw(&self, blob_id: &BlobId, job: &ReplicationJob) -> Result<()> {
        let bytes = serde_json::to_vec(job)?;
        self.write_through_tmp(&bytes, &self.repl_path(blob_id)).await
    }

    pub async fn read_replication_job(&self, blob_id: &BlobId) -> Result<Option<ReplicationJob>> {
        read_json_optional(&self.repl_path(blob_id)).await
    }

    /// Append one assignment status change. Pre-existing assignments are
    /// never dropped or reordered (§4.6/§4.7 invariant, §8 property).
    pub async fn append_assignment(&self, blob_id: &BlobId, assignment: ReplicationAssignment) -> Result<()> {
        let mut job = self
            .read_replication_job(blob_id)
            .await?
            .ok_or_else(|| DropStoreError::JobNotFound(blob_id.clone()))?;
        job.assignments.push(assignment);
        self.write_replication_job_raw(blob_id, &job).await
    }

    /// Append one line to `receipts.txt`, fsyncing before returning
    /// success (§4.6 step 6).
    pub async fn append_receipt(&self, receipt: &ReceiptEntry) -> Result<()> {
        let mut line = serde_json::to_vec(receipt)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.receipts_path())
            .await?;
        file.write_all(&line).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// The full pipeline for a freshly-received upload (§4.6 steps 1-6):
    /// write the blob, sign and write its metadata, emit a replication
    /// job, and append a `BlobStored` receipt.
    pub async fn store_blob(
        &self,
        bytes: &[u8],
        uploader: &KeyPair,
        content_type: Option<String>,
        tags: Vec<String>,
        now_ms: u64,
    ) -> Result<BlobId> {
        let blob_id = self.write_blob(bytes).await?;

        let record = MetadataRecord {
            blob_id: blob_id.clone(),
            size_bytes: bytes.len() as u64,
            uploader_pub_key: uploader.public_key_encoded(),
            created_at_ms: now_ms,
            content_type,
            tags,
            signer_public_key: String::new(),
            signature: String::new(),
        };
        self.write_metadata(record, uploader).await?;
        self.write_replication_job(&blob_id).await?;

        let mut receipt = ReceiptEntry {
            uploader_pub_key: uploader.public_key_encoded(),
            blob_id: blob_id.clone(),
            action: ReceiptAction::BlobStored,
            peer_pub_key: None,
            timestamp_ms: now_ms,
            signer_public_key: String::new(),
            signature: String::new(),
        };
        let (signature, signer_public_key) = sign_record(&receipt, uploader)?;
        receipt.signature = signature;
        receipt.signer_public_key = signer_public_key;
        self.append_receipt(&receipt).await?;

        Ok(blob_id)
    }

    /// Start-up reconciliation (§4.6 edge case): find every `.blob` file
    /// missing its `.repl.json` sibling (steps 1-4 completed, step 5 did
    /// not) and recreate the missing job. Returns the ids recreated.
    pub async fn reconcile(&self) -> Result<Vec<BlobId>> {
        let mut recreated = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".blob") else { continue };
            let blob_id = BlobId(stem.to_string());
            if self.read_replication_job(&blob_id).await?.is_none() {
                self.write_replication_job(&blob_id).await?;
                recreated.push(blob_id);
            }
        }
        Ok(recreated)
    }

    async fn write_through_tmp(&self, bytes: &[u8], dest: &Path) -> Result<()> {
        let tmp = self.tmp_path();
        {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp, dest).await?;
        Ok(())
    }
}

async fn read_json_optional<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Canonicalize `record` with its `signature`/`signerPublicKey` fields
/// stripped, sign the result, and return the encoded signature and signer
/// key to attach (§4.1/§4.2).
fn sign_record<T: serde::Serialize>(record: &T, signer: &KeyPair) -> Result<(String, String)> {
    let value = serde_json::to_value(record)?;
    let stripped = canonical::strip_fields(&value, &["signature", "signerPublicKey"]);
    let bytes = canonical::canonicalize(&stripped).map_err(|e| DropStoreError::Canonical(e.to_string()))?;
    let signature = signer.sign(&bytes);
    Ok((crypto::encode_signature(&signature), signer.public_key_encoded()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::types::AssignmentStatus;
    use tempfile::tempdir;

    async fn store() -> DropStore {
        let dir = tempdir().unwrap();
        DropStore::open(dir.path().to_path_buf(), DropStoreConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn write_then_read_blob_round_trips() {
        let store = store().await;
        let bytes = b"hello drop folder".to_vec();
        let blob_id = store.write_blob(&bytes).await.unwrap();
        let read_back = store.read_blob(&blob_id).await.unwrap();
        assert_eq!(read_back, bytes);
    }

    #[tokio::test]
    async fn tampered_blob_fails_hash_check() {
        let store = store().await;
        let bytes = b"hello".to_vec();
        let blob_id = store.write_blob(&bytes).await.unwrap();
        tokio::fs::write(store.blob_path(&blob_id), b"tampered").await.unwrap();
        assert!(matches!(
            store.read_blob(&blob_id).await,
            Err(DropStoreError::HashMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn store_blob_writes_blob_metadata_job_and_receipt() {
        let store = store().await;
        let uploader = KeyPair::generate();
        let bytes = b"payload".to_vec();

        let blob_id = store
            .store_blob(&bytes, &uploader, Some("text/plain".into()), vec![], 1000)
            .await
            .unwrap();

        assert_eq!(store.read_blob(&blob_id).await.unwrap(), bytes);
        let meta = store.read_metadata(&blob_id).await.unwrap().unwrap();
        assert_eq!(meta.uploader_pub_key, uploader.public_key_encoded());

        let job = store.read_replication_job(&blob_id).await.unwrap().unwrap();
        assert_eq!(job.target_replicas, 3);
        assert!(job.assignments.is_empty());

        let receipts = tokio::fs::read_to_string(store.receipts_path()).await.unwrap();
        assert_eq!(receipts.lines().count(), 1);
    }

    #[tokio::test]
    async fn replication_job_update_preserves_existing_assignments() {
        let store = store().await;
        let uploader = KeyPair::generate();
        let blob_id = store
            .store_blob(b"payload", &uploader, None, vec![], 1000)
            .await
            .unwrap();

        store
            .append_assignment(
                &blob_id,
                ReplicationAssignment {
                    node_id: "peer-1".into(),
                    status: AssignmentStatus::Confirmed,
                    timestamp_ms: 1001,
                },
            )
            .await
            .unwrap();

        // Re-issuing write_replication_job (as a fresh upload of the same
        // content would) must not clobber the assignment already recorded.
        store.write_replication_job(&blob_id).await.unwrap();

        let job = store.read_replication_job(&blob_id).await.unwrap().unwrap();
        assert_eq!(job.assignments.len(), 1);
        assert_eq!(job.assignments[0].node_id, "peer-1");
    }

    #[tokio::test]
    async fn reconcile_recreates_missing_replication_job() {
        let store = store().await;
        let bytes = b"orphaned".to_vec();
        let blob_id = store.write_blob(&bytes).await.unwrap();
        assert!(store.read_replication_job(&blob_id).await.unwrap().is_none());

        let recreated = store.reconcile().await.unwrap();
        assert_eq!(recreated, vec![blob_id.clone()]);
        assert!(store.read_replication_job(&blob_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn append_assignment_without_job_errors() {
        let store = store().await;
        let blob_id = BlobId("nonexistent".into());
        let result = store
            .append_assignment(
                &blob_id,
                ReplicationAssignment {
                    node_id: "peer-1".into(),
                    status: AssignmentStatus::Confirmed,
                    timestamp_ms: 1,
                },
            )
            .await;
        assert!(matches!(result, Err(DropStoreError::JobNotFound(_))));
    }
}
