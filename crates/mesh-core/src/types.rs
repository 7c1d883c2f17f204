//! The data model of the mesh core: blobs, replication jobs, tokens, trust
//! store entries, and the dispatch/discovery wire message set.
//!
//! Every signed wire struct carries `signer_public_key` and `signature` as
//! top-level fields, Base64/DER and Base64 respectively (§4.2). Timestamps
//! are milliseconds since the Unix epoch, matching the rest of this
//! lineage's use of plain `u64` millis rather than a datetime crate.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content-addressed blob identifier: lowercase hex SHA-256 of the blob's
/// bytes. Also the filename stem under the drop folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(pub String);

impl BlobId {
    pub fn from_hash(hash: &[u8; 32]) -> Self {
        Self(hex::encode(hash))
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a stored blob (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobState {
    Pending,
    Durable,
    Replicating,
    Replicated { confirmed: u32 },
    Evicted,
}

/// A stored blob's attributes, independent of its replication progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub blob_id: BlobId,
    pub size_bytes: u64,
    pub created_at_ms: u64,
    pub uploader_pub_key: String,
    pub state: BlobState,
}

/// `<blobId>.json` — signed metadata record for a blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub blob_id: BlobId,
    pub size_bytes: u64,
    pub uploader_pub_key: String,
    pub created_at_ms: u64,
    pub content_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub signer_public_key: String,
    pub signature: String,
}

/// Per-peer replication status within a job. Entries are append-only once
/// written: a later update may change `status` on an existing entry but
/// the engine must never drop or reorder entries (§4.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationAssignment {
    pub node_id: String,
    pub status: AssignmentStatus,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    CandidateSelected,
    Uploading,
    Confirmed,
    Failed { reason: String },
}

/// `<blobId>.repl.json` — replication job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationJob {
    pub blob_path: String,
    pub meta_path: String,
    pub target_replicas: u32,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub assignments: Vec<ReplicationAssignment>,
    pub last_error: Option<String>,
}

/// An append-only line in `receipts.txt`, and the same schema used as the
/// signed "Receipt" wire message in Dispatch/Negotiation (§4.9 step 8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptEntry {
    pub uploader_pub_key: String,
    pub blob_id: BlobId,
    pub action: ReceiptAction,
    pub peer_pub_key: Option<String>,
    pub timestamp_ms: u64,
    pub signer_public_key: String,
    pub signature: String,
}

/// The wire name for a [`ReceiptEntry`] sent as a standalone signed
/// message rather than appended to a local drop folder.
pub type ReceiptToken = ReceiptEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptAction {
    BlobStored,
    ReplicationConfirmed,
    TaskCompleted,
    TaskFailed,
    NotSelected,
}

/// Capability scope kinds (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    ResourceOffer,
    StorageWrite,
    StorageRead,
    ComputeRun,
    Delegate,
    Endorse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub kind: ScopeKind,
    pub resource_id: Option<String>,
    pub max_bytes: Option<u64>,
    pub limits: Option<serde_json::Value>,
}

/// The subject of a capability token: a specific key, or "any" bearer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Key(String),
    Any,
}

/// A signed capability grant (§3, §4.3). A delegation is a capability
/// token whose `scope.kind` is `Delegate` and whose subject is an
/// ephemeral key — the same schema serves both roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityToken {
    pub token_id: Uuid,
    pub issuer_pub_key: String,
    pub subject_pub_key: Subject,
    pub issued_at_ms: u64,
    pub expires_at_ms: u64,
    pub scope: Scope,
    pub nonce: String,
    pub signer_public_key: String,
    pub signature: String,
}

pub type DelegationToken = CapabilityToken;

/// A signed announcement that a key is revoked as of `effective_at_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationAnnouncement {
    pub revoked_pub_key: String,
    pub effective_at_ms: u64,
    pub reason: Option<String>,
    pub signer_public_key: String,
    pub signature: String,
}

/// A→B vouching record contributing to B's reputation (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endorsement {
    pub endorser_pub_key: String,
    pub endorsed_pub_key: String,
    pub issued_at_ms: u64,
    pub signer_public_key: String,
    pub signature: String,
}

/// Accumulated receipt counters backing the trust score formula in §4.4.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptsSummary {
    pub success_count: u64,
    pub failure_count: u64,
    pub bytes_served: u64,
}

/// Trust Store entry for one observed public key (§3, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyObservation {
    pub pub_key: String,
    pub first_seen_ms: u64,
    #[serde(default)]
    pub endorsements: Vec<Endorsement>,
    #[serde(default)]
    pub receipts_summary: ReceiptsSummary,
    pub reputation: f64,
    pub revoked: bool,
}

/// Mesh participation roles a node may hold (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    MeshParticipant,
    StorageNode,
    ComputeNode,
    TorGateway,
    ClearnetGateway,
    I2pGateway,
    Relay,
}

/// Thermal bands consulted by the Role Manager and Dispatch fitness
/// function (§4.9, §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermalState {
    Cool,
    Warm,
    Hot,
    Critical,
}

/// Snapshot of the local device's power/thermal situation, fed to both the
/// Role Manager and the Dispatch fitness score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerHint {
    pub battery_percent: f64,
    pub charging: bool,
    pub thermal: ThermalState,
}

impl PowerHint {
    /// Fraction of headroom before the configured compute threshold, in
    /// [0, 1]; 1.0 while charging (§4.9's battery term of the fitness score).
    pub fn battery_headroom(&self, min_for_compute: f64) -> f64 {
        if self.charging {
            return 1.0;
        }
        ((self.battery_percent - min_for_compute) / (100.0 - min_for_compute))
            .clamp(0.0, 1.0)
    }

    pub fn permits_compute(&self, min_battery: f64, max_thermal: ThermalState) -> bool {
        (self.charging || self.battery_percent >= min_battery) && self.thermal <= max_thermal
    }

    /// Whether a peer in this power state should be handed a replication
    /// upload (§4.7 candidate selection): storage writes are cheap enough
    /// not to need a battery floor, but a peer already in `Hot`/`Critical`
    /// thermal shouldn't take on more I/O.
    pub fn permits_storage(&self) -> bool {
        self.thermal <= ThermalState::Warm
    }
}

/// Service type categories announced over Discovery (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Storage,
    Python,
    Ml,
    Java,
    Native,
    Workflow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAnnouncement {
    pub service_id: String,
    pub service_type: ServiceType,
    pub version: String,
    pub resource_requirements: serde_json::Value,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub execution_profile: serde_json::Value,
    pub signer_public_key: String,
    pub signature: String,
}

/// Where a task's result should be delivered (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSink {
    BlobWrite,
    Unicast { address: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConstraints {
    pub max_latency_ms: Option<u64>,
    pub result_sink: ResultSink,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub task_id: Uuid,
    pub service_id: String,
    pub inputs: Vec<BlobId>,
    pub constraints: TaskConstraints,
    pub requester_ephemeral_pub_key: String,
    /// Ordered root-to-leaf delegation chain authorizing the signer,
    /// capped at depth 4 by the Verifier (§4.5).
    pub delegation_chain: Vec<DelegationToken>,
    pub nonce: String,
    pub expires_at_ms: u64,
    pub signer_public_key: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub task_id: Uuid,
    pub offerer_ephemeral_pub_key: String,
    /// Ordered root-to-leaf delegation chain authorizing the signer,
    /// capped at depth 4 by the Verifier (§4.5).
    pub delegation_chain: Vec<DelegationToken>,
    pub fitness_score: f64,
    pub resource_reservation: serde_json::Value,
    pub expires_at_ms: u64,
    pub signer_public_key: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub task_id: Uuid,
    pub selected_offerer_pub_key: String,
    pub challenge_nonce: String,
    pub issued_at_ms: u64,
    pub signer_public_key: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelAssignment {
    pub task_id: Uuid,
    pub reason: Option<String>,
    pub issued_at_ms: u64,
    pub signer_public_key: String,
    pub signature: String,
}

/// A capability or delegation token wrapped for transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenEnvelope {
    pub token: CapabilityToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceQuery {
    pub query_id: Uuid,
    pub filter: serde_json::Value,
    pub ttl_hops: u8,
    pub requester_ephemeral_pub_key: String,
    pub signer_public_key: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOffer {
    pub query_id: Uuid,
    pub announcement: ServiceAnnouncement,
    pub signer_public_key: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileQuery {
    pub query_id: Uuid,
    pub blob_id_prefix: String,
    pub ttl_hops: u8,
    pub signer_public_key: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOffer {
    pub query_id: Uuid,
    pub blob_id: BlobId,
    pub has_blob: bool,
    pub signer_public_key: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUploadChunk {
    pub blob_id: BlobId,
    pub chunk_index: u32,
    pub total_size: Option<u64>,
    pub data: Vec<u8>,
    pub signer_public_key: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInventoryQuery {
    pub blob_id: BlobId,
    pub signer_public_key: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInventoryResponse {
    pub blob_id: BlobId,
    pub present: bool,
    pub signer_public_key: String,
    pub signature: String,
}
