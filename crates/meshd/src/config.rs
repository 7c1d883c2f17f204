//! Daemon configuration (§4.13, §4.10, §4.11). CLI/env driven, the same
//! `clap::Parser` shape as the lineage's `gossipd::config::Config` and
//! `routerd::config::Config`.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "meshd")]
#[command(about = "Mesh node daemon: drop folder store, replication, discovery, dispatch")]
pub struct Config {
    /// Data directory for the Drop Folder Store and Trust Store.
    #[arg(short, long, env = "MESHD_DATA_DIR", default_value = "./data/meshd")]
    pub data_dir: PathBuf,

    /// Deterministic signing key seed, hex-encoded. Generates a fresh
    /// random identity when unset.
    #[arg(long, env = "MESHD_KEY_SEED")]
    pub key_seed_hex: Option<String>,

    /// Roles this node is permitted to take on, comma-separated
    /// (mesh_participant is always implied).
    #[arg(long, value_delimiter = ',', default_value = "storage_node,compute_node")]
    pub allowed_roles: Vec<String>,

    /// Storage quota in bytes before STORAGE_NODE eligibility requires
    /// more free space (§4.10) and before the governor refuses further
    /// writes (§4.11).
    #[arg(long, default_value_t = 5 * 1024 * 1024 * 1024)]
    pub storage_bytes_max: u64,

    /// Minimum battery percentage (while not charging) required to hold
    /// COMPUTE_NODE (§4.10) and to accept a task offer (§4.9).
    #[arg(long, default_value_t = 30.0)]
    pub min_battery_for_compute: f64,

    /// Role recompute debounce, milliseconds (§4.10).
    #[arg(long, default_value_t = rolemgr::DEFAULT_DEBOUNCE_MS)]
    pub role_debounce_ms: u64,

    /// Demotion grace period before hard-cancelling obligations,
    /// milliseconds (§4.10).
    #[arg(long, default_value_t = rolemgr::DEFAULT_DEMOTION_GRACE_MS)]
    pub demotion_grace_ms: u64,

    /// How often the replication driver reconciles pending jobs,
    /// seconds.
    #[arg(long, default_value_t = 30)]
    pub replication_interval_secs: u64,

    /// Minimum trust score the Verifier requires of an acting subject
    /// (§4.5 step 10). 0.0 disables the gate.
    #[arg(long, default_value_t = 0.0)]
    pub min_trust_threshold: f64,

    /// Log format: "json" or "pretty".
    #[arg(long, default_value = "pretty")]
    pub log_format: String,

    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage_bytes_max == 0 {
            anyhow::bail!("storage-bytes-max must be greater than zero");
        }
        if !(0.0..=100.0).contains(&self.min_battery_for_compute) {
            anyhow::bail!("min-battery-for-compute must be between 0 and 100");
        }
        Ok(())
    }

    pub fn allowed_role_set(&self) -> Vec<mesh_core::types::Role> {
        self.allowed_roles
            .iter()
            .filter_map(|name| parse_role(name))
            .collect()
    }
}

fn parse_role(name: &str) -> Option<mesh_core::types::Role> {
    use mesh_core::types::Role;
    match name.trim() {
        "mesh_participant" => Some(Role::MeshParticipant),
        "storage_node" => Some(Role::StorageNode),
        "compute_node" => Some(Role::ComputeNode),
        "tor_gateway" => Some(Role::TorGateway),
        "clearnet_gateway" => Some(Role::ClearnetGateway),
        "i2p_gateway" => Some(Role::I2pGateway),
        "relay" => Some(Role::Relay),
        _ => None,
    }
}
