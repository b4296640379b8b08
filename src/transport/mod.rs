//! Transport Layer Abstractions
//!
//! Transports deliver typed frames on one bidirectional link and report
//! when the link goes away; everything else (negotiation, routing,
//! liveness) is the engine's job. A concrete transport (TCP, WebSocket,
//! local IPC) produces a [`Link`] per connection and, for byte-oriented
//! media, carries frames with [`crate::protocol::codec`].

pub mod memory;

use crate::protocol::Frame;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Channel sender for frames toward the remote end.
pub type FrameSender = mpsc::UnboundedSender<Frame>;

/// Channel receiver for frames from the remote end.
pub type FrameReceiver = mpsc::UnboundedReceiver<Frame>;

/// Unique identifier for a link within one engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    /// Create a new link ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link:{}", self.0)
    }
}

/// Connection direction: who initiated the link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkDirection {
    /// We initiated (client role in negotiation).
    Outbound,
    /// The remote initiated (server role in negotiation).
    Inbound,
}

impl fmt::Display for LinkDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkDirection::Outbound => "outbound",
            LinkDirection::Inbound => "inbound",
        };
        write!(f, "{}", s)
    }
}

/// Errors related to link operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("link closed")]
    Closed,
}

/// One bidirectional link as handed to the engine by a transport.
#[derive(Debug)]
pub struct Link {
    direction: LinkDirection,
    tx: FrameSender,
    rx: FrameReceiver,
    /// Channel-binding material for auth flows, when the transport has
    /// any (e.g. a TLS certificate fingerprint).
    local_security: Option<Vec<u8>>,
    remote_security: Option<Vec<u8>>,
}

impl Link {
    /// Assemble a link from its parts.
    pub fn new(direction: LinkDirection, tx: FrameSender, rx: FrameReceiver) -> Self {
        Self {
            direction,
            tx,
            rx,
            local_security: None,
            remote_security: None,
        }
    }

    /// Attach channel-binding material from the transport.
    pub fn with_security(
        mut self,
        local_security: Option<Vec<u8>>,
        remote_security: Option<Vec<u8>>,
    ) -> Self {
        self.local_security = local_security;
        self.remote_security = remote_security;
        self
    }

    /// Connection direction.
    pub fn direction(&self) -> LinkDirection {
        self.direction
    }

    /// Public security parameter of the local transport end, if any.
    pub fn local_security(&self) -> Option<&[u8]> {
        self.local_security.as_deref()
    }

    /// Public security parameter of the remote transport end, if any.
    pub fn remote_security(&self) -> Option<&[u8]> {
        self.remote_security.as_deref()
    }

    /// Split into the engine-held send handle and the receive half.
    pub fn into_parts(self) -> (LinkHandle, FrameReceiver) {
        (
            LinkHandle {
                direction: self.direction,
                tx: self.tx,
            },
            self.rx,
        )
    }
}

/// Sending half of a link, owned by the engine.
#[derive(Clone, Debug)]
pub struct LinkHandle {
    direction: LinkDirection,
    tx: FrameSender,
}

impl LinkHandle {
    /// Connection direction.
    pub fn direction(&self) -> LinkDirection {
        self.direction
    }

    /// Send a frame to the remote end.
    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }
}
