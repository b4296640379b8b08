//! Topology Layer
//!
//! Tracks every known node in the mesh, ingests routing gossip from
//! active peers, and derives the next-hop table.
//!
//! Gossip is pull-based and eventually consistent: peers periodically
//! exchange `NodeSummary` frames listing (node, version) pairs; a
//! receiver requests full `NodeDetails` for anything newer than its own
//! records. Broadcasts coalesce on a short timer so bursts of change
//! produce one summary.

mod node;
mod routing;

pub use node::TopologyNode;
pub use routing::{Route, Routing, RoutingEvent};

pub(crate) use node::version_newer;

use crate::identity::NodeId;
use crate::protocol::{Frame, Neighbor, NodeRouting, NodeVersion};
use crate::transport::LinkId;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::{debug, trace};

/// Bookkeeping for one active peer.
#[derive(Debug)]
struct PeerDetails {
    id: NodeId,
    latency_ms: u64,
    /// Node ids this peer currently advertises routing for.
    advertised: HashSet<NodeId>,
}

/// Output of a topology operation, for the caller to execute.
#[derive(Debug)]
pub enum TopologyEvent {
    /// A node became reachable.
    Available(NodeId),
    /// A node stopped being reachable.
    Unavailable(NodeId),
    /// Send a gossip frame on a peer link.
    SendFrame { link: LinkId, frame: Frame },
}

/// The orchestrator of nodes, peers, and routing.
pub struct Topology {
    self_id: NodeId,
    endpoint: bool,
    broadcast_delay_ms: u64,
    peers: HashMap<LinkId, PeerDetails>,
    peers_by_id: HashMap<NodeId, LinkId>,
    nodes: HashMap<NodeId, TopologyNode>,
    next_seq: u64,
    routing: Routing,
    broadcast_at_ms: Option<u64>,
}

impl Topology {
    /// Create a topology for the local node.
    pub fn new(self_id: NodeId, endpoint: bool, broadcast_delay_ms: u64) -> Self {
        let mut nodes = HashMap::new();
        let mut self_node = TopologyNode::new(self_id.clone(), 0);
        self_node.set_direct(true);
        nodes.insert(self_id.clone(), self_node);

        Self {
            self_id,
            endpoint,
            broadcast_delay_ms,
            peers: HashMap::new(),
            peers_by_id: HashMap::new(),
            nodes,
            next_seq: 1,
            routing: Routing::new(),
            broadcast_at_ms: None,
        }
    }

    // === Accessors ===

    /// The local node id.
    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    /// Number of tracked peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Number of known nodes, including self.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether this link carries a tracked peer.
    pub fn is_tracked(&self, link: LinkId) -> bool {
        self.peers.contains_key(&link)
    }

    /// Remote id of a tracked peer.
    pub fn peer_id(&self, link: LinkId) -> Option<&NodeId> {
        self.peers.get(&link).map(|d| &d.id)
    }

    /// Link of the directly connected peer with this id.
    pub fn link_for(&self, id: &NodeId) -> Option<LinkId> {
        self.peers_by_id.get(id).copied()
    }

    /// Next hop toward `target`, if reachable.
    pub fn next_hop(&self, target: &NodeId) -> Option<&Route> {
        self.routing.next_hop(target)
    }

    /// Current version of the self node.
    pub fn self_version(&self) -> u32 {
        self.nodes[&self.self_id].version()
    }

    /// Look up a node record.
    pub fn node(&self, id: &NodeId) -> Option<&TopologyNode> {
        self.nodes.get(id)
    }

    // === Peer lifecycle ===

    /// Track a peer that just became Active.
    ///
    /// A second link to an already-tracked remote id is ignored: the
    /// older connection wins.
    pub fn add_peer(
        &mut self,
        link: LinkId,
        id: NodeId,
        latency_ms: u64,
        now_ms: u64,
    ) -> Vec<TopologyEvent> {
        if id == self.self_id {
            debug!(link = %link, "Refusing to track ourselves");
            return Vec::new();
        }
        if self.peers_by_id.contains_key(&id) {
            debug!(link = %link, peer = %id, "Duplicate peer, older connection wins");
            return Vec::new();
        }

        self.peers.insert(
            link,
            PeerDetails {
                id: id.clone(),
                latency_ms,
                advertised: HashSet::new(),
            },
        );
        self.peers_by_id.insert(id.clone(), link);
        self.ensure_node(&id).set_direct(true);

        self.rebuild_self_edges();
        self.routing.mark_dirty();
        self.schedule_broadcast(now_ms);

        debug!(link = %link, peer = %id, latency_ms, "Peer tracked");
        self.refresh_routing()
    }

    /// Stop tracking a peer whose link went away.
    pub fn remove_peer(&mut self, link: LinkId, now_ms: u64) -> Vec<TopologyEvent> {
        let details = match self.peers.remove(&link) {
            Some(details) => details,
            None => return Vec::new(),
        };
        if self.peers_by_id.get(&details.id) == Some(&link) {
            self.peers_by_id.remove(&details.id);
        }
        if let Some(node) = self.nodes.get_mut(&details.id) {
            node.set_direct(false);
        }

        // Drop every routing contribution this link made.
        for node in self.nodes.values_mut() {
            node.remove_routing(link);
        }

        self.rebuild_self_edges();
        self.routing.mark_dirty();
        self.schedule_broadcast(now_ms);

        debug!(link = %link, peer = %details.id, "Peer untracked");
        self.refresh_routing()
    }

    /// Record a new latency estimate for a tracked peer.
    pub fn update_peer_latency(
        &mut self,
        link: LinkId,
        latency_ms: u64,
        now_ms: u64,
    ) -> Vec<TopologyEvent> {
        match self.peers.get_mut(&link) {
            Some(details) if details.latency_ms != latency_ms => {
                details.latency_ms = latency_ms;
            }
            _ => return Vec::new(),
        }

        if self.rebuild_self_edges() {
            self.routing.mark_dirty();
            self.schedule_broadcast(now_ms);
            self.refresh_routing()
        } else {
            Vec::new()
        }
    }

    // === Gossip handlers ===

    /// Ingest a NodeSummary from a peer.
    pub fn handle_summary(
        &mut self,
        link: LinkId,
        own_version: u32,
        entries: Vec<NodeVersion>,
        now_ms: u64,
    ) -> Vec<TopologyEvent> {
        let (peer_id, previously_advertised) = match self.peers.get(&link) {
            Some(details) => (details.id.clone(), details.advertised.clone()),
            None => {
                trace!(link = %link, "Summary from untracked link, ignoring");
                return Vec::new();
            }
        };

        let mut request: Vec<NodeId> = Vec::new();

        // The peer's own record is covered by own_version.
        if let Some(node) = self.nodes.get(&peer_id) {
            if version_newer(own_version, node.version()) {
                request.push(peer_id.clone());
            }
        }

        for entry in &entries {
            if entry.id == self.self_id || entry.id == peer_id {
                continue;
            }
            let wanted = match self.nodes.get(&entry.id) {
                None => true,
                Some(node) => version_newer(entry.version, node.version()),
            };
            if wanted {
                request.push(entry.id.clone());
            }
        }

        // The summary is the peer's full inventory: anything it used to
        // advertise but no longer lists loses this peer as a provider.
        let summary_ids: HashSet<NodeId> = entries.into_iter().map(|e| e.id).collect();
        let mut changed = false;
        for id in previously_advertised {
            if summary_ids.contains(&id) || id == peer_id {
                continue;
            }
            if self.nodes.get(&id).map(|n| n.direct()).unwrap_or(false) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                changed |= node.remove_routing(link);
            }
            if let Some(details) = self.peers.get_mut(&link) {
                details.advertised.remove(&id);
            }
        }

        let mut events = Vec::new();
        if !request.is_empty() {
            trace!(link = %link, count = request.len(), "Requesting node details");
            events.push(TopologyEvent::SendFrame {
                link,
                frame: Frame::NodeRequest { nodes: request },
            });
        }

        if changed {
            self.routing.mark_dirty();
            self.schedule_broadcast(now_ms);
            events.extend(self.refresh_routing());
        }
        events
    }

    /// Answer a NodeRequest with the details we hold.
    pub fn handle_request(&mut self, link: LinkId, ids: Vec<NodeId>) -> Vec<TopologyEvent> {
        if !self.peers.contains_key(&link) {
            return Vec::new();
        }

        let details: Vec<NodeRouting> = ids
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .map(|node| NodeRouting {
                id: node.id().clone(),
                version: node.version(),
                neighbors: node
                    .outgoing()
                    .iter()
                    .map(|(id, latency)| Neighbor {
                        id: id.clone(),
                        latency: *latency,
                    })
                    .collect(),
            })
            .collect();

        if details.is_empty() {
            return Vec::new();
        }
        vec![TopologyEvent::SendFrame {
            link,
            frame: Frame::NodeDetails { nodes: details },
        }]
    }

    /// Ingest NodeDetails from a peer.
    pub fn handle_details(
        &mut self,
        link: LinkId,
        entries: Vec<NodeRouting>,
        now_ms: u64,
    ) -> Vec<TopologyEvent> {
        if !self.peers.contains_key(&link) {
            return Vec::new();
        }

        let mut changed = false;
        for entry in entries {
            if entry.id == self.self_id {
                debug!(link = %link, "Ignoring details that would overwrite self");
                continue;
            }
            let neighbors: Vec<(NodeId, u32)> = entry
                .neighbors
                .into_iter()
                .map(|n| (n.id, n.latency))
                .collect();

            let node = self.ensure_node(&entry.id);
            changed |= node.update_routing(link, entry.version, neighbors);

            if let Some(details) = self.peers.get_mut(&link) {
                details.advertised.insert(entry.id);
            }
        }

        if changed {
            self.routing.mark_dirty();
            self.schedule_broadcast(now_ms);
            self.refresh_routing()
        } else {
            Vec::new()
        }
    }

    // === Timers ===

    /// Fire the coalesced broadcast if it is due.
    pub fn poll(&mut self, now_ms: u64) -> Vec<TopologyEvent> {
        match self.broadcast_at_ms {
            Some(at) if now_ms >= at => {}
            _ => return Vec::new(),
        }
        self.broadcast_at_ms = None;

        let summary = self.build_summary();
        self.peers
            .keys()
            .map(|link| TopologyEvent::SendFrame {
                link: *link,
                frame: summary.clone(),
            })
            .collect()
    }

    // === Internals ===

    fn ensure_node(&mut self, id: &NodeId) -> &mut TopologyNode {
        if !self.nodes.contains_key(id) {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.nodes
                .insert(id.clone(), TopologyNode::new(id.clone(), seq));
        }
        self.nodes.get_mut(id).expect("node just ensured")
    }

    /// Recompute the self node's edge set from the live peers.
    fn rebuild_self_edges(&mut self) -> bool {
        let edges: BTreeMap<NodeId, u32> = self
            .peers
            .values()
            .map(|d| (d.id.clone(), d.latency_ms.min(u64::from(u32::MAX)) as u32))
            .collect();
        let self_node = self
            .nodes
            .get_mut(&self.self_id)
            .expect("self node always exists");
        self_node.rebuild_self(edges)
    }

    fn refresh_routing(&mut self) -> Vec<TopologyEvent> {
        if !self.routing.is_dirty() {
            return Vec::new();
        }
        self.routing
            .refresh(&self.self_id, &self.nodes, &self.peers_by_id)
            .into_iter()
            .map(|event| match event {
                RoutingEvent::Available(id) => TopologyEvent::Available(id),
                RoutingEvent::Unavailable(id) => TopologyEvent::Unavailable(id),
            })
            .collect()
    }

    /// Endpoints consume gossip but never produce it.
    fn schedule_broadcast(&mut self, now_ms: u64) {
        if self.endpoint {
            return;
        }
        if self.broadcast_at_ms.is_none() {
            self.broadcast_at_ms = Some(now_ms + self.broadcast_delay_ms);
        }
    }

    fn build_summary(&self) -> Frame {
        let mut advertised: Vec<&TopologyNode> = self
            .nodes
            .values()
            .filter(|n| *n.id() != self.self_id && n.is_advertised())
            .collect();
        advertised.sort_by_key(|n| n.seq());

        Frame::NodeSummary {
            own_version: self.self_version(),
            nodes: advertised
                .into_iter()
                .map(|n| NodeVersion {
                    id: n.id().clone(),
                    version: n.version(),
                })
                .collect(),
        }
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("self_id", &self.self_id)
            .field("endpoint", &self.endpoint)
            .field("peers", &self.peers.len())
            .field("nodes", &self.nodes.len())
            .field("routes", &self.routing.route_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_id(val: u8) -> NodeId {
        NodeId::from_bytes(vec![val; 4])
    }

    fn make_topology(self_val: u8) -> Topology {
        Topology::new(make_id(self_val), false, 100)
    }

    fn send_frames(events: &[TopologyEvent]) -> Vec<(LinkId, &Frame)> {
        events
            .iter()
            .filter_map(|e| match e {
                TopologyEvent::SendFrame { link, frame } => Some((*link, frame)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_add_peer_makes_it_available() {
        let mut topology = make_topology(0);
        let events = topology.add_peer(LinkId::new(1), make_id(1), 100, 0);

        assert!(events
            .iter()
            .any(|e| matches!(e, TopologyEvent::Available(id) if *id == make_id(1))));
        assert_eq!(topology.next_hop(&make_id(1)).unwrap().link, LinkId::new(1));
        assert_eq!(topology.self_version(), 1);
    }

    #[test]
    fn test_duplicate_peer_ignored() {
        let mut topology = make_topology(0);
        topology.add_peer(LinkId::new(1), make_id(1), 100, 0);
        let events = topology.add_peer(LinkId::new(2), make_id(1), 100, 0);

        assert!(events.is_empty());
        assert_eq!(topology.peer_count(), 1);
        assert_eq!(topology.link_for(&make_id(1)), Some(LinkId::new(1)));
    }

    #[test]
    fn test_remove_peer_emits_unavailable() {
        let mut topology = make_topology(0);
        topology.add_peer(LinkId::new(1), make_id(1), 100, 0);
        let events = topology.remove_peer(LinkId::new(1), 10);

        assert!(events
            .iter()
            .any(|e| matches!(e, TopologyEvent::Unavailable(id) if *id == make_id(1))));
        assert!(topology.next_hop(&make_id(1)).is_none());
    }

    #[test]
    fn test_broadcast_coalesces_and_fires() {
        let mut topology = make_topology(0);
        topology.add_peer(LinkId::new(1), make_id(1), 100, 0);
        topology.add_peer(LinkId::new(2), make_id(2), 100, 20);

        // Not yet due.
        assert!(topology.poll(50).is_empty());

        // One broadcast at the first deadline, sent to both peers.
        let events = topology.poll(100);
        let frames = send_frames(&events);
        assert_eq!(frames.len(), 2);
        for (_, frame) in &frames {
            match frame {
                Frame::NodeSummary { own_version, .. } => assert_eq!(*own_version, 2),
                other => panic!("expected summary, got {}", other.type_name()),
            }
        }

        // Nothing further scheduled.
        assert!(topology.poll(1_000).is_empty());
    }

    #[test]
    fn test_endpoint_never_broadcasts() {
        let mut topology = Topology::new(make_id(0), true, 100);
        for i in 1..=100u8 {
            topology.add_peer(LinkId::new(i as u64), make_id(i), 100, 0);
        }
        assert!(topology.poll(10_000).is_empty());
    }

    #[test]
    fn test_summary_triggers_request_for_newer_nodes() {
        let mut topology = make_topology(0);
        topology.add_peer(LinkId::new(1), make_id(1), 100, 0);

        let events = topology.handle_summary(
            LinkId::new(1),
            3, // peer's own version, newer than our fresh record
            vec![NodeVersion {
                id: make_id(7),
                version: 2,
            }],
            10,
        );

        let frames = send_frames(&events);
        assert_eq!(frames.len(), 1);
        match frames[0].1 {
            Frame::NodeRequest { nodes } => {
                assert!(nodes.contains(&make_id(1)));
                assert!(nodes.contains(&make_id(7)));
            }
            other => panic!("expected request, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_known_versions_not_requested() {
        let mut topology = make_topology(0);
        topology.add_peer(LinkId::new(1), make_id(1), 100, 0);
        topology.handle_details(
            LinkId::new(1),
            vec![NodeRouting {
                id: make_id(7),
                version: 5,
                neighbors: vec![],
            }],
            10,
        );

        let events = topology.handle_summary(
            LinkId::new(1),
            0,
            vec![NodeVersion {
                id: make_id(7),
                version: 5,
            }],
            20,
        );
        assert!(send_frames(&events).is_empty());
    }

    #[test]
    fn test_details_build_routes_through_peer() {
        let mut topology = make_topology(0);
        topology.add_peer(LinkId::new(1), make_id(1), 100, 0);

        // Peer 1 advertises node 7 reachable from it at 50ms.
        let events = topology.handle_details(
            LinkId::new(1),
            vec![NodeRouting {
                id: make_id(1),
                version: 1,
                neighbors: vec![
                    Neighbor {
                        id: make_id(0),
                        latency: 100,
                    },
                    Neighbor {
                        id: make_id(7),
                        latency: 50,
                    },
                ],
            }],
            10,
        );

        assert!(events
            .iter()
            .any(|e| matches!(e, TopologyEvent::Available(id) if *id == make_id(7))));
        let route = topology.next_hop(&make_id(7)).unwrap();
        assert_eq!(route.first_hop, make_id(1));
        assert_eq!(route.latency, 150);
    }

    #[test]
    fn test_details_never_overwrite_self() {
        let mut topology = make_topology(0);
        topology.add_peer(LinkId::new(1), make_id(1), 100, 0);
        let version_before = topology.self_version();

        topology.handle_details(
            LinkId::new(1),
            vec![NodeRouting {
                id: make_id(0),
                version: 999,
                neighbors: vec![],
            }],
            10,
        );
        assert_eq!(topology.self_version(), version_before);
    }

    #[test]
    fn test_summary_withdraws_missing_nodes() {
        let mut topology = make_topology(0);
        topology.add_peer(LinkId::new(1), make_id(1), 100, 0);
        // Peer 1 advertises itself (edge to 7) and node 7 (edge to 9):
        // 9 is reachable only through 7's advertised routing.
        topology.handle_details(
            LinkId::new(1),
            vec![
                NodeRouting {
                    id: make_id(1),
                    version: 1,
                    neighbors: vec![Neighbor {
                        id: make_id(7),
                        latency: 50,
                    }],
                },
                NodeRouting {
                    id: make_id(7),
                    version: 1,
                    neighbors: vec![Neighbor {
                        id: make_id(9),
                        latency: 30,
                    }],
                },
            ],
            10,
        );
        assert!(topology.next_hop(&make_id(9)).is_some());

        // Peer's next summary no longer lists node 7: its routing via
        // this peer goes away and 9 drops off. 7 itself stays reachable
        // as a plain edge target of node 1.
        let events = topology.handle_summary(
            LinkId::new(1),
            1,
            vec![NodeVersion {
                id: make_id(1),
                version: 1,
            }],
            200,
        );
        assert!(events
            .iter()
            .any(|e| matches!(e, TopologyEvent::Unavailable(id) if *id == make_id(9))));
        assert!(topology.next_hop(&make_id(9)).is_none());
        assert!(topology.next_hop(&make_id(7)).is_some());
    }

    #[test]
    fn test_request_answered_with_known_details() {
        let mut topology = make_topology(0);
        topology.add_peer(LinkId::new(1), make_id(1), 100, 0);

        let events = topology.handle_request(LinkId::new(1), vec![make_id(0), make_id(42)]);
        let frames = send_frames(&events);
        assert_eq!(frames.len(), 1);
        match frames[0].1 {
            Frame::NodeDetails { nodes } => {
                // Unknown node 42 skipped; self record served.
                assert_eq!(nodes.len(), 1);
                assert_eq!(nodes[0].id, make_id(0));
                assert_eq!(nodes[0].neighbors.len(), 1);
            }
            other => panic!("expected details, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_latency_update_bumps_version_and_schedules() {
        let mut topology = make_topology(0);
        topology.add_peer(LinkId::new(1), make_id(1), 100, 0);
        topology.poll(100); // drain initial broadcast

        let before = topology.self_version();
        topology.update_peer_latency(LinkId::new(1), 140, 200);
        assert_eq!(topology.self_version(), before + 1);
        assert!(!topology.poll(300).is_empty());

        // Same value again: nothing changes, nothing scheduled.
        topology.update_peer_latency(LinkId::new(1), 140, 400);
        assert!(topology.poll(600).is_empty());
    }
}
