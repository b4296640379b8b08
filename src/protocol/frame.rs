//! Frame definitions for the peer protocol.

use crate::identity::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A typed frame on one peer link.
///
/// Negotiation frames drive the peer state machine; everything from
/// `NodeSummary` down flows only on Active links.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// Server's opening message: its identity and capability set.
    Hello {
        id: NodeId,
        capabilities: BTreeSet<String>,
    },

    /// Client's reply to Hello: its identity and selected capabilities.
    Select {
        id: NodeId,
        capabilities: BTreeSet<String>,
    },

    /// Client's authentication attempt with one provider.
    Auth {
        method: String,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },

    /// Continuation data within an authentication exchange.
    AuthData {
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },

    /// Positive acknowledgement (select accepted, auth accepted).
    Ok,

    /// Negative acknowledgement (select or auth rejected).
    Reject,

    /// Client's final negotiation message; both sides are now active.
    Begin,

    /// Keep-alive probe.
    Ping,

    /// Keep-alive reply.
    Pong,

    /// Orderly disconnect request.
    Bye,

    /// Gossip: the sender's own version plus (id, version) for every
    /// node it can route to.
    NodeSummary {
        own_version: u32,
        nodes: Vec<NodeVersion>,
    },

    /// Gossip: request full routing details for the listed nodes.
    NodeRequest { nodes: Vec<NodeId> },

    /// Gossip: routing details for the requested nodes.
    NodeDetails { nodes: Vec<NodeRouting> },

    /// Application payload, source-routed toward `target`.
    Data {
        source: NodeId,
        target: NodeId,
        id: u32,
        kind: String,
        path: Vec<NodeId>,
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Delivery acknowledgement, routed back along `path` in reverse.
    DataAck {
        id: u32,
        target: NodeId,
        path: Vec<NodeId>,
    },

    /// Delivery rejection, routed back along `path` in reverse.
    DataReject {
        id: u32,
        target: NodeId,
        path: Vec<NodeId>,
        code: RejectCode,
    },
}

impl Frame {
    /// Frame type name for logging and dispatch diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "Hello",
            Frame::Select { .. } => "Select",
            Frame::Auth { .. } => "Auth",
            Frame::AuthData { .. } => "AuthData",
            Frame::Ok => "Ok",
            Frame::Reject => "Reject",
            Frame::Begin => "Begin",
            Frame::Ping => "Ping",
            Frame::Pong => "Pong",
            Frame::Bye => "Bye",
            Frame::NodeSummary { .. } => "NodeSummary",
            Frame::NodeRequest { .. } => "NodeRequest",
            Frame::NodeDetails { .. } => "NodeDetails",
            Frame::Data { .. } => "Data",
            Frame::DataAck { .. } => "DataAck",
            Frame::DataReject { .. } => "DataReject",
        }
    }

    /// Check if this frame may flow on an Active link.
    pub fn is_active_frame(&self) -> bool {
        matches!(
            self,
            Frame::Ping
                | Frame::Pong
                | Frame::Bye
                | Frame::NodeSummary { .. }
                | Frame::NodeRequest { .. }
                | Frame::NodeDetails { .. }
                | Frame::Data { .. }
                | Frame::DataAck { .. }
                | Frame::DataReject { .. }
        )
    }
}

/// A (node, version) pair inside a NodeSummary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeVersion {
    pub id: NodeId,
    pub version: u32,
}

/// One outgoing edge inside a NodeRouting entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: NodeId,
    /// Edge weight in milliseconds.
    pub latency: u32,
}

/// Full routing details for one node, as published by an advertiser.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRouting {
    pub id: NodeId,
    pub version: u32,
    pub neighbors: Vec<Neighbor>,
}

/// Reason code carried by a DataReject frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    /// No next hop toward the target.
    NoRoute,
    /// The forwarding node already appears in the path.
    Loop,
    /// The path reached the hop limit.
    HopLimit,
    /// The target refused the payload.
    Rejected,
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectCode::NoRoute => "no_route",
            RejectCode::Loop => "loop",
            RejectCode::HopLimit => "hop_limit",
            RejectCode::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}
