//! Shortest-path routing over the topology graph.

use super::node::TopologyNode;
use crate::identity::NodeId;
use crate::transport::LinkId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Routing result for one reachable node.
#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    /// Link of the first-hop peer.
    pub link: LinkId,
    /// Identity of the first-hop peer.
    pub first_hop: NodeId,
    /// Accumulated latency of the whole path, in milliseconds.
    pub latency: u64,
}

/// Reachability delta produced by a refresh.
#[derive(Clone, Debug, PartialEq)]
pub enum RoutingEvent {
    /// The node became reachable.
    Available(NodeId),
    /// The node is no longer reachable.
    Unavailable(NodeId),
}

/// Heap entry ordering encodes the tie-break rules: lower accumulated
/// latency first, then lexicographic first-hop id, then insertion order
/// of the node being settled.
#[derive(PartialEq, Eq)]
struct Candidate {
    latency: u64,
    first_hop: NodeId,
    seq: u64,
    node: NodeId,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.latency, &self.first_hop, self.seq, &self.node).cmp(&(
            other.latency,
            &other.first_hop,
            other.seq,
            &other.node,
        ))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Derived next-hop table over the topology graph.
#[derive(Debug, Default)]
pub struct Routing {
    dirty: bool,
    routes: HashMap<NodeId, Route>,
}

impl Routing {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            dirty: true,
            routes: HashMap::new(),
        }
    }

    /// Mark the table stale; the next [`refresh`](Routing::refresh)
    /// recomputes it.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Whether the table is stale.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Next hop toward `target`, if reachable.
    pub fn next_hop(&self, target: &NodeId) -> Option<&Route> {
        self.routes.get(target)
    }

    /// All currently reachable nodes.
    pub fn reachable(&self) -> impl Iterator<Item = &NodeId> {
        self.routes.keys()
    }

    /// Number of reachable nodes.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Recompute shortest paths from `self_id` and return the
    /// reachability delta against the previous table.
    ///
    /// `peer_links` maps the id of each directly connected peer to its
    /// link; the self node's outgoing edges must be a subset of its keys.
    pub fn refresh(
        &mut self,
        self_id: &NodeId,
        nodes: &HashMap<NodeId, TopologyNode>,
        peer_links: &HashMap<NodeId, LinkId>,
    ) -> Vec<RoutingEvent> {
        self.dirty = false;

        let new_routes = compute_routes(self_id, nodes, peer_links);

        let mut events = Vec::new();
        for id in self.routes.keys() {
            if !new_routes.contains_key(id) {
                events.push(RoutingEvent::Unavailable(id.clone()));
            }
        }
        for id in new_routes.keys() {
            if !self.routes.contains_key(id) {
                events.push(RoutingEvent::Available(id.clone()));
            }
        }

        self.routes = new_routes;
        events
    }
}

fn compute_routes(
    self_id: &NodeId,
    nodes: &HashMap<NodeId, TopologyNode>,
    peer_links: &HashMap<NodeId, LinkId>,
) -> HashMap<NodeId, Route> {
    let mut routes: HashMap<NodeId, Route> = HashMap::new();
    let mut heap: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();

    let self_node = match nodes.get(self_id) {
        Some(node) => node,
        None => return routes,
    };

    // Seed with the direct edges; the first hop is the neighbor itself.
    for (neighbor, weight) in self_node.outgoing() {
        if neighbor == self_id || !peer_links.contains_key(neighbor) {
            continue;
        }
        heap.push(Reverse(Candidate {
            latency: u64::from(*weight),
            first_hop: neighbor.clone(),
            seq: nodes.get(neighbor).map(|n| n.seq()).unwrap_or(u64::MAX),
            node: neighbor.clone(),
        }));
    }

    while let Some(Reverse(candidate)) = heap.pop() {
        if routes.contains_key(&candidate.node) {
            continue;
        }
        let link = match peer_links.get(&candidate.first_hop) {
            Some(link) => *link,
            None => continue,
        };
        routes.insert(
            candidate.node.clone(),
            Route {
                link,
                first_hop: candidate.first_hop.clone(),
                latency: candidate.latency,
            },
        );

        let node = match nodes.get(&candidate.node) {
            Some(node) => node,
            // A neighbor we only know as an edge target: reachable,
            // but nothing to expand.
            None => continue,
        };
        for (next, weight) in node.outgoing() {
            if next == self_id || routes.contains_key(next) {
                continue;
            }
            heap.push(Reverse(Candidate {
                latency: candidate.latency + u64::from(*weight),
                first_hop: candidate.first_hop.clone(),
                seq: nodes.get(next).map(|n| n.seq()).unwrap_or(u64::MAX),
                node: next.clone(),
            }));
        }
    }

    routes
}
