//! Peer Lifecycle
//!
//! One [`Peer`] exists per accepted or initiated link. It owns the
//! negotiation state machine that takes the link from a raw frame stream
//! to an authenticated, keep-alived Active peer, plus the per-peer
//! liveness machinery (latency window, accrual failure detector, ping
//! scheduling).
//!
//! The state machine is synchronous and clock-explicit: callers feed it
//! frames and poll it with `now_ms`, and it answers with the actions to
//! perform (frames to send, events to surface, disconnects to execute).

mod failure;
mod latency;
mod negotiation;

pub use failure::AccrualFailureDetector;
pub use latency::{LatencyError, LatencyTracker, LATENCY_WINDOW};
pub use negotiation::{Peer, PeerAction};

use std::fmt;

/// Negotiation state of one peer link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    /// Created, transport not yet reported up.
    Initial,
    /// Client: waiting for the server's Hello.
    WaitingForHello,
    /// Server: Hello sent, waiting for Select.
    WaitingForSelect,
    /// Client: Select sent, waiting for Ok/Reject.
    WaitingForSelectAck,
    /// Server: waiting for an Auth attempt.
    WaitingForAuth,
    /// Client: Auth sent, waiting for the outcome.
    WaitingForAuthAck,
    /// Server: AuthData sent, waiting for the client's continuation.
    WaitingForAuthData,
    /// Server: auth accepted, waiting for Begin.
    WaitingForBegin,
    /// Negotiation complete; data and gossip may flow.
    Active,
}

impl PeerState {
    /// Check if negotiation is still in progress.
    pub fn is_negotiating(&self) -> bool {
        !matches!(self, PeerState::Active)
    }

    /// Check if the peer is active.
    pub fn is_active(&self) -> bool {
        matches!(self, PeerState::Active)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerState::Initial => "initial",
            PeerState::WaitingForHello => "waiting_for_hello",
            PeerState::WaitingForSelect => "waiting_for_select",
            PeerState::WaitingForSelectAck => "waiting_for_select_ack",
            PeerState::WaitingForAuth => "waiting_for_auth",
            PeerState::WaitingForAuthAck => "waiting_for_auth_ack",
            PeerState::WaitingForAuthData => "waiting_for_auth_data",
            PeerState::WaitingForBegin => "waiting_for_begin",
            PeerState::Active => "active",
        };
        write!(f, "{}", s)
    }
}

/// Which side of the link this peer is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerRole {
    /// We initiated the link.
    Client,
    /// The remote initiated the link.
    Server,
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerRole::Client => "client",
            PeerRole::Server => "server",
        };
        write!(f, "{}", s)
    }
}

/// Why a peer link was torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Requested locally or via Bye.
    Manual,
    /// Protocol violation or negotiation timeout.
    NegotiationFailed,
    /// Every configured auth provider was rejected.
    AuthReject,
    /// The failure detector declared the peer dead.
    PingTimeout,
    /// The transport reported the link gone.
    TransportError,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectReason::Manual => "manual",
            DisconnectReason::NegotiationFailed => "negotiation_failed",
            DisconnectReason::AuthReject => "auth_reject",
            DisconnectReason::PingTimeout => "ping_timeout",
            DisconnectReason::TransportError => "transport_error",
        };
        write!(f, "{}", s)
    }
}
