//! In-memory transport.
//!
//! Connects two engines in the same process with a pair of unbounded
//! frame channels. Frames travel as typed values; no encoding happens.
//! This is the transport the integration tests and demos run on.

use super::{Link, LinkDirection};
use tokio::sync::mpsc;

/// Create a connected pair of links.
///
/// The first link is the initiating (outbound/client) side, the second
/// the accepting (inbound/server) side. Dropping either side closes the
/// other's receive half.
pub fn pair() -> (Link, Link) {
    let (initiator_tx, acceptor_rx) = mpsc::unbounded_channel();
    let (acceptor_tx, initiator_rx) = mpsc::unbounded_channel();

    (
        Link::new(LinkDirection::Outbound, initiator_tx, initiator_rx),
        Link::new(LinkDirection::Inbound, acceptor_tx, acceptor_rx),
    )
}
