//! Overlay Protocol Messages
//!
//! Typed frames exchanged between directly connected peers. The set is
//! closed: negotiation frames (Hello through Begin), liveness frames
//! (Ping/Pong/Bye), routing gossip (NodeSummary/NodeRequest/NodeDetails)
//! and the data plane (Data/DataAck/DataReject).
//!
//! Frames are structured values; the engine hands them to transports as-is.
//! Byte-oriented transports use [`codec`] to carry them as CBOR, with
//! `NodeId` as an opaque byte string.

pub mod codec;
mod error;
mod frame;

pub use error::ProtocolError;
pub use frame::{Frame, Neighbor, NodeRouting, NodeVersion, RejectCode};

/// Protocol version agreed on during negotiation.
///
/// The frame schema carries no explicit version field; agreement is
/// implicit in the frame set both sides speak.
pub const PROTOCOL_VERSION: u8 = 1;
