//! Network Engine
//!
//! Top-level structure gluing the layers together: links and their
//! [`Peer`] state machines, the [`Topology`] with its routing table, and
//! the [`Messaging`] data plane. This is the type applications embed.
//!
//! The engine is synchronous and clock-explicit. Frames, link closures,
//! and timer ticks are fed in with an explicit `now_ms`; every entry
//! point returns the [`NetworkEvent`]s the call produced. The async
//! [`NetworkDriver`](driver::NetworkDriver) wraps this with a tokio loop
//! for deployments that want one.

mod driver;
#[cfg(test)]
mod tests;

pub use driver::{DriverError, NetworkCommand, NetworkDriver, NetworkHandle};

use crate::auth::{AuthContext, AuthRegistry};
use crate::config::{ConfigError, NetworkConfig};
use crate::identity::NodeId;
use crate::messaging::{Messaging, MessagingEvent, SendReceipt};
use crate::peer::{DisconnectReason, Peer, PeerAction, PeerRole};
use crate::protocol::Frame;
use crate::topology::{Topology, TopologyEvent};
use crate::transport::{FrameReceiver, Link, LinkDirection, LinkHandle, LinkId};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

/// Event surfaced to the embedding application.
#[derive(Clone, Debug, PartialEq)]
pub enum NetworkEvent {
    /// A node became reachable.
    NodeAvailable(NodeId),
    /// A node stopped being reachable.
    NodeUnavailable(NodeId),
    /// An application payload arrived.
    Message {
        source: NodeId,
        kind: String,
        payload: Vec<u8>,
    },
    /// A peer link finished negotiation.
    PeerConnected { link: LinkId, id: NodeId },
    /// A peer link was torn down.
    PeerDisconnected {
        link: LinkId,
        id: NodeId,
        reason: DisconnectReason,
    },
}

/// The overlay engine for one local node.
pub struct Network {
    local_id: NodeId,
    config: NetworkConfig,
    auth: AuthRegistry,
    links: HashMap<LinkId, LinkHandle>,
    peers: HashMap<LinkId, Peer>,
    topology: Topology,
    messaging: Messaging,
    next_link_id: u64,
}

impl Network {
    /// Create an engine for `local_id` with the given configuration and
    /// auth providers.
    pub fn new(
        local_id: NodeId,
        config: NetworkConfig,
        auth: AuthRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let topology = Topology::new(local_id.clone(), config.endpoint, config.broadcast_delay_ms);
        let messaging = Messaging::new(local_id.clone(), config.hop_limit, config.request_timeout_ms);
        Ok(Self {
            local_id,
            config,
            auth,
            links: HashMap::new(),
            peers: HashMap::new(),
            topology,
            messaging,
            next_link_id: 1,
        })
    }

    // === Accessors ===

    /// This node's id.
    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    /// The configuration the engine runs with.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// The topology view, including the routing table.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The peer on a link, if any.
    pub fn peer(&self, link: LinkId) -> Option<&Peer> {
        self.peers.get(&link)
    }

    /// Number of links with a live peer (negotiating or active).
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Number of active peers.
    pub fn active_peer_count(&self) -> usize {
        self.peers.values().filter(|p| p.is_active()).count()
    }

    // === Link lifecycle ===

    /// Take over a transport link and start negotiating on it.
    ///
    /// Returns the link id, the receive half for the caller to pump into
    /// [`handle_frame`](Network::handle_frame), and any events produced
    /// by the opening moves.
    pub fn attach(&mut self, link: Link, now_ms: u64) -> (LinkId, FrameReceiver, Vec<NetworkEvent>) {
        let link_id = LinkId::new(self.next_link_id);
        self.next_link_id += 1;

        let auth_ctx = AuthContext {
            local_public_security: link.local_security().map(|b| b.to_vec()),
            remote_public_security: link.remote_security().map(|b| b.to_vec()),
        };
        let (handle, rx) = link.into_parts();
        let role = match handle.direction() {
            LinkDirection::Outbound => PeerRole::Client,
            LinkDirection::Inbound => PeerRole::Server,
        };
        self.links.insert(link_id, handle);

        let mut peer = Peer::new(
            link_id,
            role,
            self.local_id.clone(),
            self.auth.clone(),
            auth_ctx,
            &self.config,
        );
        let actions = peer.start(now_ms);
        self.peers.insert(link_id, peer);

        debug!(link = %link_id, role = %role, "Link attached");

        let mut events = Vec::new();
        self.process_peer_actions(link_id, actions, now_ms, &mut events);
        (link_id, rx, events)
    }

    /// Feed a frame received on a link through the engine.
    pub fn handle_frame(&mut self, link: LinkId, frame: Frame, now_ms: u64) -> Vec<NetworkEvent> {
        let actions = match self.peers.get_mut(&link) {
            Some(peer) => peer.handle_frame(frame, now_ms),
            None => {
                debug!(link = %link, "Frame on unknown link, dropping");
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        self.process_peer_actions(link, actions, now_ms, &mut events);
        self.sync_peer_latency(link, now_ms, &mut events);
        events
    }

    /// The transport reported the link gone.
    pub fn handle_link_closed(&mut self, link: LinkId, now_ms: u64) -> Vec<NetworkEvent> {
        let mut events = Vec::new();
        self.abort_peer(link, DisconnectReason::TransportError, now_ms, &mut events);
        events
    }

    /// Manually disconnect a peer: announce Bye, then tear down.
    pub fn disconnect(&mut self, link: LinkId, now_ms: u64) -> Vec<NetworkEvent> {
        if let Some(handle) = self.links.get(&link) {
            // Best effort; the link may already be gone.
            let _ = handle.send(Frame::Bye);
        }
        let mut events = Vec::new();
        self.abort_peer(link, DisconnectReason::Manual, now_ms, &mut events);
        events
    }

    // === Application interface ===

    /// Send a payload to `target`.
    ///
    /// The receipt resolves once the target acknowledges; it rejects
    /// with [`SendError`](crate::messaging::SendError) on failure or
    /// after the request timeout.
    pub fn send(
        &mut self,
        target: NodeId,
        kind: &str,
        payload: Vec<u8>,
        now_ms: u64,
    ) -> (SendReceipt, Vec<NetworkEvent>) {
        let (receipt, messaging_events) =
            self.messaging
                .send(&self.topology, target, kind, payload, now_ms);
        let mut events = Vec::new();
        self.process_messaging_events(messaging_events, &mut events);
        (receipt, events)
    }

    /// Drive every timer: peer deadlines, gossip broadcast, request
    /// timeouts.
    pub fn tick(&mut self, now_ms: u64) -> Vec<NetworkEvent> {
        let mut events = Vec::new();

        let link_ids: Vec<LinkId> = self.peers.keys().copied().collect();
        for link in link_ids {
            let actions = match self.peers.get_mut(&link) {
                Some(peer) => peer.poll(now_ms),
                None => continue,
            };
            if !actions.is_empty() {
                self.process_peer_actions(link, actions, now_ms, &mut events);
            }
        }

        let topology_events = self.topology.poll(now_ms);
        self.process_topology_events(topology_events, &mut events);

        self.messaging.poll(now_ms);

        events
    }

    // === Internals ===

    fn process_peer_actions(
        &mut self,
        link: LinkId,
        actions: Vec<PeerAction>,
        now_ms: u64,
        events: &mut Vec<NetworkEvent>,
    ) {
        for action in actions {
            match action {
                PeerAction::Send(frame) => {
                    if !self.send_on_link(link, frame) {
                        let negotiating = self
                            .peers
                            .get(&link)
                            .map(|p| !p.is_active())
                            .unwrap_or(false);
                        if negotiating {
                            self.abort_peer(
                                link,
                                DisconnectReason::TransportError,
                                now_ms,
                                events,
                            );
                            return;
                        }
                    }
                }
                PeerAction::Connected => {
                    let (remote, latency) = match self.peers.get(&link) {
                        Some(peer) => (
                            peer.remote_id().clone(),
                            peer.latency().unwrap_or(self.config.base_latency_ms),
                        ),
                        None => continue,
                    };
                    info!(link = %link, peer = %remote, "Peer connected");
                    let topology_events =
                        self.topology.add_peer(link, remote.clone(), latency, now_ms);
                    self.process_topology_events(topology_events, events);
                    events.push(NetworkEvent::PeerConnected { link, id: remote });
                }
                PeerAction::Deliver(frame) => {
                    self.dispatch_active_frame(link, frame, now_ms, events);
                }
                PeerAction::Disconnect(reason) => {
                    self.abort_peer(link, reason, now_ms, events);
                    return;
                }
            }
        }
    }

    fn dispatch_active_frame(
        &mut self,
        link: LinkId,
        frame: Frame,
        now_ms: u64,
        events: &mut Vec<NetworkEvent>,
    ) {
        match frame {
            Frame::NodeSummary { own_version, nodes } => {
                let topology_events = self.topology.handle_summary(link, own_version, nodes, now_ms);
                self.process_topology_events(topology_events, events);
            }
            Frame::NodeRequest { nodes } => {
                let topology_events = self.topology.handle_request(link, nodes);
                self.process_topology_events(topology_events, events);
            }
            Frame::NodeDetails { nodes } => {
                let topology_events = self.topology.handle_details(link, nodes, now_ms);
                self.process_topology_events(topology_events, events);
            }
            Frame::Data {
                source,
                target,
                id,
                kind,
                path,
                payload,
            } => {
                let messaging_events = self.messaging.handle_data(
                    &self.topology,
                    link,
                    source,
                    target,
                    id,
                    kind,
                    path,
                    payload,
                );
                self.process_messaging_events(messaging_events, events);
            }
            Frame::DataAck { id, target, path } => {
                let messaging_events = self.messaging.handle_ack(&self.topology, id, target, path);
                self.process_messaging_events(messaging_events, events);
            }
            Frame::DataReject {
                id,
                target,
                path,
                code,
            } => {
                let messaging_events =
                    self.messaging
                        .handle_reject(&self.topology, id, target, path, code);
                self.process_messaging_events(messaging_events, events);
            }
            other => {
                debug!(link = %link, frame = other.type_name(), "Unhandled active frame");
            }
        }
    }

    fn process_topology_events(
        &mut self,
        topology_events: Vec<TopologyEvent>,
        events: &mut Vec<NetworkEvent>,
    ) {
        for event in topology_events {
            match event {
                TopologyEvent::Available(id) => events.push(NetworkEvent::NodeAvailable(id)),
                TopologyEvent::Unavailable(id) => events.push(NetworkEvent::NodeUnavailable(id)),
                TopologyEvent::SendFrame { link, frame } => {
                    self.send_on_link(link, frame);
                }
            }
        }
    }

    fn process_messaging_events(
        &mut self,
        messaging_events: Vec<MessagingEvent>,
        events: &mut Vec<NetworkEvent>,
    ) {
        for event in messaging_events {
            match event {
                MessagingEvent::Deliver {
                    source,
                    kind,
                    payload,
                } => events.push(NetworkEvent::Message {
                    source,
                    kind,
                    payload,
                }),
                MessagingEvent::SendFrame { link, frame } => {
                    self.send_on_link(link, frame);
                }
            }
        }
    }

    /// Send a frame on a link. Active-phase failures are logged only:
    /// the transport's own close notification drives the teardown.
    fn send_on_link(&mut self, link: LinkId, frame: Frame) -> bool {
        let frame_name = frame.type_name();
        match self.links.get(&link) {
            Some(handle) => match handle.send(frame) {
                Ok(()) => true,
                Err(error) => {
                    debug!(link = %link, frame = frame_name, error = %error, "Send failed");
                    false
                }
            },
            None => {
                debug!(link = %link, frame = frame_name, "Send on unknown link");
                false
            }
        }
    }

    /// Feed a changed latency estimate into the topology.
    fn sync_peer_latency(&mut self, link: LinkId, now_ms: u64, events: &mut Vec<NetworkEvent>) {
        let latency = match self.peers.get(&link) {
            Some(peer) if peer.is_active() => match peer.latency() {
                Ok(latency) => latency,
                Err(_) => return,
            },
            _ => return,
        };
        let topology_events = self.topology.update_peer_latency(link, latency, now_ms);
        self.process_topology_events(topology_events, events);
    }

    /// Remove the peer and its link, untrack it in the topology, and
    /// surface the disconnect.
    fn abort_peer(
        &mut self,
        link: LinkId,
        reason: DisconnectReason,
        now_ms: u64,
        events: &mut Vec<NetworkEvent>,
    ) {
        let peer = match self.peers.remove(&link) {
            Some(peer) => peer,
            None => return,
        };
        self.links.remove(&link);

        let remote = peer.remote_id().clone();
        info!(link = %link, peer = %remote, reason = %reason, "Peer disconnected");

        let topology_events = self.topology.remove_peer(link, now_ms);
        self.process_topology_events(topology_events, events);

        events.push(NetworkEvent::PeerDisconnected {
            link,
            id: remote,
            reason,
        });
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("local_id", &self.local_id)
            .field("endpoint", &self.config.endpoint)
            .field("peers", &self.peers.len())
            .field("active", &self.active_peer_count())
            .finish()
    }
}
