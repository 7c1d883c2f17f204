//! mesh-net - peer identity, wire framing, and the Transport Adapter
//! contract (§4.12). Concrete production transports are out of scope;
//! `transport::LoopbackTransport` is the in-process implementation used
//! by every other crate's tests.

pub mod framing;
pub mod peer;
pub mod transport;

pub use framing::{Frame, FrameCodec, FrameType};
pub use peer::{PeerId, PeerRecord};
pub use transport::{LoopbackNetwork, LoopbackTransport, PeerEvent, TransportAdapter, TransportError};
