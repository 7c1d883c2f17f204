//! The node supervisor (§4.13). Construction is pure data — no task is
//! spawned until `Core::start` is called on an `Arc<Core>` already
//! shared with every task it spawns, fixing the lineage's
//! `Server::clone_arc` anti-pattern (`gossipd::server::Server`, which
//! rebuilds a second, divergent `Server` instance per spawned
//! connection instead of sharing the original).

use crate::config::Config;
use crate::power::PowerSampler;
use dropstore::{DropStore, DropStoreConfig};
use mesh_core::crypto::KeyPair;
use mesh_core::types::Role;
use mesh_net::peer::{PeerId, PeerRecord};
use mesh_net::transport::TransportAdapter;
use parking_lot::RwLock;
use rolemgr::{RoleBudgets, RoleInputs, RoleManager, RoleManagerConfig};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};
use trust_store::TrustStore;
use uuid::Uuid;
use verifier::{Verifier, VerifierConfig};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("storage error: {0}")]
    Storage(#[from] dropstore::DropStoreError),
    #[error("trust store error: {0}")]
    Trust(#[from] trust_store::TrustStoreError),
}

pub struct Core {
    config: Config,
    signer: KeyPair,
    store: Arc<DropStore>,
    trust: Arc<TrustStore>,
    verifier: Arc<Verifier>,
    transport: Arc<dyn TransportAdapter>,
    replication: Arc<replication::ReplicationEngine>,
    discovery: Arc<discovery::Discovery>,
    dispatch: Arc<dispatch::Dispatch>,
    role_manager: Arc<RoleManager>,
    governor: Arc<governor::ResourceGovernor>,
    power: Arc<dyn PowerSampler>,
    peers: RwLock<HashMap<PeerId, PeerRecord>>,
    /// Tasks this node currently has in flight, keyed by the role whose
    /// eligibility they depend on (e.g. a task executed under
    /// `COMPUTE_NODE`). Consulted by the demotion reap loop so a role
    /// that expires mid-task hard-cancels it rather than leaving it
    /// running unsupervised (spec.md scenario S5).
    role_tasks: RwLock<HashMap<Role, HashSet<Uuid>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Core {
    pub async fn new(
        config: Config,
        transport: Arc<dyn TransportAdapter>,
        power: Arc<dyn PowerSampler>,
    ) -> Result<Self, CoreError> {
        let signer = match &config.key_seed_hex {
            Some(hex_seed) => {
                let bytes = hex::decode(hex_seed).unwrap_or_default();
                let mut seed = [0u8; 32];
                let len = bytes.len().min(32);
                seed[..len].copy_from_slice(&bytes[..len]);
                KeyPair::from_seed(seed)
            }
            None => KeyPair::generate(),
        };

        let store = Arc::new(DropStore::open(config.data_dir.join("drop"), DropStoreConfig::default()).await?);
        let trust = TrustStore::open(config.data_dir.join("trust.db"))?;

        let verifier = Arc::new(Verifier::new(
            trust.clone(),
            VerifierConfig {
                min_trust_threshold: config.min_trust_threshold,
                ..VerifierConfig::default()
            },
        ));

        let replication = Arc::new(replication::ReplicationEngine::new(
            store.clone(),
            trust.clone(),
            transport.clone(),
            KeyPair::from_seed(signer.seed()),
            replication::ReplicationEngineConfig::default(),
        ));

        let discovery = Arc::new(discovery::Discovery::new(transport.clone(), discovery::DiscoveryConfig::default()));

        let dispatch = Arc::new(dispatch::Dispatch::new(
            transport.clone(),
            trust.clone(),
            verifier.clone(),
            KeyPair::from_seed(signer.seed()),
            dispatch::DispatchConfig::default(),
        ));

        let role_manager = Arc::new(RoleManager::new(RoleManagerConfig {
            budgets: RoleBudgets {
                storage_quota_bytes: config.storage_bytes_max,
                compute_battery_threshold: config.min_battery_for_compute,
            },
            debounce_ms: config.role_debounce_ms,
            demotion_grace_ms: config.demotion_grace_ms,
        }));

        let governor = Arc::new(governor::ResourceGovernor::new(governor::GovernorConfig {
            storage_bytes_max: config.storage_bytes_max,
            ..governor::GovernorConfig::default()
        }));

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            signer,
            store,
            trust,
            verifier,
            transport,
            replication,
            discovery,
            dispatch,
            role_manager,
            governor,
            power,
            peers: RwLock::new(HashMap::new()),
            role_tasks: RwLock::new(HashMap::new()),
            shutdown_tx,
        })
    }

    pub fn public_key(&self) -> String {
        self.signer.public_key_encoded()
    }

    pub fn governor(&self) -> &governor::ResourceGovernor {
        &self.governor
    }

    pub fn role_manager(&self) -> &RoleManager {
        &self.role_manager
    }

    /// The Drop Folder Store, for the writer-facing surface that hands
    /// new blobs to this core (§4.6).
    pub fn store(&self) -> &Arc<DropStore> {
        &self.store
    }

    /// The Transport Adapter this core was constructed with (§4.12).
    pub fn transport(&self) -> &Arc<dyn TransportAdapter> {
        &self.transport
    }

    /// The Discovery component, driven by inbound `ServiceQuery`/
    /// `FileQuery` frames rather than a ticker (§4.8) — callers that own
    /// the transport's event loop dispatch frames here as they arrive.
    pub fn discovery(&self) -> &discovery::Discovery {
        &self.discovery
    }

    /// The Dispatch component, driven per incoming `TaskRequest` rather
    /// than a ticker (§4.9).
    pub fn dispatch(&self) -> &dispatch::Dispatch {
        &self.dispatch
    }

    /// The Verifier, for callers authenticating inbound wire messages
    /// outside the loops this core already drives (§4.5).
    pub fn verifier(&self) -> &Arc<Verifier> {
        &self.verifier
    }

    /// The Trust Store, for receipt recording and trust queries made
    /// from outside this core's own loops (§4.4).
    pub fn trust(&self) -> &Arc<TrustStore> {
        &self.trust
    }

    fn known_peers(&self) -> Vec<PeerRecord> {
        self.peers.read().values().cloned().collect()
    }

    /// Record or refresh a peer observed by the Transport Adapter or
    /// Discovery (§3). Refused once `peerRecordsMax` is reached (§4.11).
    pub fn register_peer(&self, peer: PeerRecord) -> Result<(), governor::QuotaExceeded> {
        let mut peers = self.peers.write();
        if !peers.contains_key(&peer.id) {
            self.governor.try_register_peer()?;
        }
        peers.insert(peer.id, peer);
        Ok(())
    }

    pub fn forget_peer(&self, id: &PeerId) {
        if self.peers.write().remove(id).is_some() {
            self.governor.forget_peer();
        }
    }

    /// Record that `task_id` is executing under `role`, so a later
    /// demotion of that role knows to hard-cancel it.
    pub fn track_task_for_role(&self, role: Role, task_id: Uuid) {
        self.role_tasks.write().entry(role).or_default().insert(task_id);
    }

    /// Drop a task from in-flight tracking once it completes (or is
    /// cancelled) through its normal lifecycle.
    pub fn untrack_task(&self, task_id: Uuid) {
        self.role_tasks.write().values_mut().for_each(|tasks| {
            tasks.remove(&task_id);
        });
    }

    /// Spawn every background task. Each task closes over a clone of
    /// `self` (the same `Arc`, not a rebuilt duplicate) so state stays
    /// single-sourced.
    pub fn start(self: Arc<Self>) -> CoreHandles {
        info!(pub_key = %self.public_key(), "starting meshd core");

        let role_handle = self.clone().spawn_role_loop();
        let demotion_handle = self.clone().spawn_demotion_reap_loop();
        let replication_handle = self.clone().spawn_replication_loop();

        CoreHandles {
            core: self,
            handles: vec![role_handle, demotion_handle, replication_handle],
        }
    }

    fn spawn_role_loop(self: Arc<Self>) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(self.config.role_debounce_ms));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now_ms = now_ms();
                        let inputs = RoleInputs {
                            power: self.power.sample(),
                            free_storage_bytes: self.config.storage_bytes_max
                                .saturating_sub(self.governor.counters().storage_bytes_used),
                            allowed_roles: self.config.allowed_role_set().into_iter().collect::<HashSet<_>>(),
                            gateway_connectivity: HashMap::new(),
                        };
                        let transition = self.role_manager.recompute(&inputs, now_ms);
                        if !transition.promoted.is_empty() || !transition.demotion_scheduled.is_empty() {
                            debug!(?transition, "role transition");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    fn spawn_demotion_reap_loop(self: Arc<Self>) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let expired = self.role_manager.reap_expired_demotions(now_ms());
                        for role in expired {
                            warn!(?role, "role hard-demoted after grace period");
                            self.cancel_tasks_for_role(role).await;
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    /// §4.10/spec.md scenario S5: hard-cancel every task still running
    /// under a role that just lost its grace period, via a signed
    /// `CancelAssignment` broadcast through Dispatch.
    async fn cancel_tasks_for_role(&self, role: Role) {
        let tasks: Vec<Uuid> = self
            .role_tasks
            .write()
            .remove(&role)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        for task_id in tasks {
            match self.dispatch.cancel_assignment(task_id, Some(format!("{role:?} role demoted")), now_ms()) {
                Ok(cancel) => {
                    if let Err(e) = self.dispatch.broadcast_cancel_assignment(&cancel).await {
                        warn!(%task_id, error = %e, "failed to broadcast cancel assignment");
                    }
                }
                Err(e) => warn!(%task_id, error = %e, "failed to sign cancel assignment"),
            }
        }
    }

    fn spawn_replication_loop(self: Arc<Self>) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(self.config.replication_interval_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.store.reconcile().await {
                            Ok(pending) => {
                                let peers = self.known_peers();
                                for blob_id in pending {
                                    if let Err(e) = self.replication.advance_job(&blob_id, &peers, now_ms()).await {
                                        warn!(%blob_id, error = %e, "replication advance failed");
                                    }
                                }
                            }
                            Err(e) => warn!(error = %e, "reconcile failed"),
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }
}

pub struct CoreHandles {
    core: Arc<Core>,
    handles: Vec<JoinHandle<()>>,
}

impl CoreHandles {
    pub fn shutdown(&self) {
        let _ = self.core.shutdown_tx.send(());
    }

    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
