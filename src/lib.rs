//! Weft: a peer-to-peer messaging overlay.
//!
//! Nodes form a partially connected mesh over pluggable transports and
//! deliver application messages between any two nodes by multi-hop
//! routing. Each link runs a negotiation and authentication state
//! machine before carrying traffic; active peers gossip per-node routing
//! summaries and converge on latency-weighted shortest paths.

pub mod auth;
pub mod config;
pub mod identity;
pub mod messaging;
pub mod node;
pub mod peer;
pub mod protocol;
pub mod topology;
pub mod transport;
pub mod util;

// Re-export identity types
pub use identity::NodeId;

// Re-export config types
pub use config::{ConfigError, NetworkConfig};

// Re-export protocol types
pub use protocol::{Frame, Neighbor, NodeRouting, NodeVersion, ProtocolError, RejectCode, PROTOCOL_VERSION};

// Re-export auth types
pub use auth::{
    AnonymousAuth, AuthContext, AuthProvider, AuthRegistry, ClientFlow, ClientReply,
    SharedSecretAuth, ServerFlow, ServerReply,
};

// Re-export peer types
pub use peer::{
    AccrualFailureDetector, DisconnectReason, LatencyError, LatencyTracker, Peer, PeerAction,
    PeerRole, PeerState,
};

// Re-export transport types
pub use transport::{FrameReceiver, FrameSender, Link, LinkDirection, LinkHandle, LinkId, TransportError};

// Re-export topology types
pub use topology::{Route, Routing, RoutingEvent, Topology, TopologyEvent, TopologyNode};

// Re-export messaging types
pub use messaging::{Messaging, MessagingEvent, SendError, SendReceipt};

// Re-export engine types
pub use node::{
    DriverError, Network, NetworkCommand, NetworkDriver, NetworkEvent, NetworkHandle,
};

// Re-export request/reply helper
pub use util::RequestReplyHelper;
