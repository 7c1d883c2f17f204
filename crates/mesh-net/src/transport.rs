//! Transport Adapter contract (§4.12).
//!
//! The core depends only on this trait; concrete transports (QUIC over the
//! mesh link layer, Tor, Wi-Fi Direct) are external collaborators and out
//! of scope for this crate (§1). `LoopbackTransport` is the one concrete
//! implementor shipped here, for in-process tests of every component that
//! sits on top of this trait.

use crate::framing::Frame;
use crate::peer::PeerId;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer not found: {0}")]
    PeerNotFound(PeerId),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("operation not supported by this transport")]
    Unsupported,
}

/// Events the core reacts to without initiating them itself.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    PeerUp(PeerId),
    PeerDown(PeerId),
    FrameReceived(PeerId, Frame),
}

/// The contract every component programs against (§4.12). Broadcast is
/// explicitly best-effort: implementations may drop messages under load
/// rather than block.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    async fn unicast_send(&self, peer: PeerId, frame: Frame) -> Result<(), TransportError>;
    async fn broadcast(&self, frame: Frame) -> Result<(), TransportError>;
    fn subscribe(&self) -> broadcast::Receiver<PeerEvent>;
    fn our_id(&self) -> PeerId;
}

struct LoopboxMsg {
    from: PeerId,
    frame: Frame,
}

/// A shared in-process network that `LoopbackTransport` instances join.
/// Exists purely to make components under test observable to each other
/// without a real socket.
pub struct LoopbackNetwork {
    senders: RwLock<HashMap<PeerId, mpsc::UnboundedSender<LoopboxMsg>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            senders: RwLock::new(HashMap::new()),
        })
    }

    /// Join the network as `id`, spawning the task that turns inbound
    /// loopback messages into `PeerEvent`s.
    pub fn join(self: &Arc<Self>, id: PeerId) -> LoopbackTransport {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.senders.write().insert(id, tx);

        let (events_tx, _) = broadcast::channel(256);
        let events_tx_task = events_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let _ = events_tx_task.send(PeerEvent::FrameReceived(msg.from, msg.frame));
            }
        });

        let _ = events_tx.send(PeerEvent::PeerUp(id));

        LoopbackTransport {
            id,
            network: self.clone(),
            events_tx,
        }
    }

    fn send_to(&self, to: PeerId, msg: LoopboxMsg) -> Result<(), TransportError> {
        let senders = self.senders.read();
        let sender = senders.get(&to).ok_or(TransportError::PeerNotFound(to))?;
        sender
            .send(msg)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn all_peers_except(&self, exclude: PeerId) -> Vec<PeerId> {
        self.senders
            .read()
            .keys()
            .filter(|id| **id != exclude)
            .copied()
            .collect()
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
        }
    }
}

pub struct LoopbackTransport {
    id: PeerId,
    network: Arc<LoopbackNetwork>,
    events_tx: broadcast::Sender<PeerEvent>,
}

#[async_trait]
impl TransportAdapter for LoopbackTransport {
    async fn unicast_send(&self, peer: PeerId, frame: Frame) -> Result<(), TransportError> {
        self.network.send_to(
            peer,
            LoopboxMsg {
                from: self.id,
                frame,
            },
        )
    }

    async fn broadcast(&self, frame: Frame) -> Result<(), TransportError> {
        for peer in self.network.all_peers_except(self.id) {
            // Best-effort: a single unreachable peer does not fail the
            // whole broadcast.
            let _ = self.network.send_to(
                peer,
                LoopboxMsg {
                    from: self.id,
                    frame: frame.clone(),
                },
            );
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events_tx.subscribe()
    }

    fn our_id(&self) -> PeerId {
        self.id
    }
}
