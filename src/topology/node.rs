//! Per-node topology records.

use crate::identity::NodeId;
use crate::transport::LinkId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Wrap-aware version comparison: `a` is newer than `b` iff they differ
/// and the unsigned distance from `b` to `a` is less than half the range.
pub(crate) fn version_newer(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < u32::MAX / 2
}

/// What one peer currently advertises for a node.
#[derive(Clone, Debug, PartialEq)]
struct RoutingContribution {
    version: u32,
    neighbors: Vec<(NodeId, u32)>,
}

/// Everything known about one node in the mesh, including ourselves.
///
/// A node may be advertised by several peers at different versions; the
/// effective outgoing edge set mirrors the newest advertisement. Peer
/// handles are plain link ids, so a contribution from a link that has
/// since disconnected is inert data until [`remove_routing`] clears it.
///
/// [`remove_routing`]: TopologyNode::remove_routing
pub struct TopologyNode {
    id: NodeId,
    /// Creation order within the owning topology; routing tie-break.
    seq: u64,
    version: u32,
    direct: bool,
    contributions: HashMap<LinkId, RoutingContribution>,
    outgoing: BTreeMap<NodeId, u32>,
}

impl TopologyNode {
    /// Create an empty record.
    pub fn new(id: NodeId, seq: u64) -> Self {
        Self {
            id,
            seq,
            version: 0,
            direct: false,
            contributions: HashMap::new(),
            outgoing: BTreeMap::new(),
        }
    }

    /// Node identity.
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Creation sequence within the topology.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Current version of the outgoing edge set.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Whether the node is reachable over a currently connected peer.
    pub fn direct(&self) -> bool {
        self.direct
    }

    /// Mark or clear direct reachability.
    pub fn set_direct(&mut self, direct: bool) {
        self.direct = direct;
    }

    /// Effective outgoing edges (neighbor id → latency ms).
    pub fn outgoing(&self) -> &BTreeMap<NodeId, u32> {
        &self.outgoing
    }

    /// Whether anyone advertises routing for this node.
    pub fn is_advertised(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Peers currently advertising this node.
    pub fn reachable_via(&self) -> impl Iterator<Item = LinkId> + '_ {
        self.contributions.keys().copied()
    }

    /// Whether the given peer advertises this node.
    pub fn advertised_by(&self, peer: LinkId) -> bool {
        self.contributions.contains_key(&peer)
    }

    /// Replace what `peer` advertises for this node.
    ///
    /// Returns true iff the effective outgoing set or a weight changed.
    pub fn update_routing(
        &mut self,
        peer: LinkId,
        version: u32,
        neighbors: Vec<(NodeId, u32)>,
    ) -> bool {
        self.contributions
            .insert(peer, RoutingContribution { version, neighbors });
        self.recompute_effective()
    }

    /// Drop the contribution from `peer`, recomputing the effective set
    /// from whatever advertisers remain.
    ///
    /// Returns true iff the effective outgoing set changed.
    pub fn remove_routing(&mut self, peer: LinkId) -> bool {
        if self.contributions.remove(&peer).is_none() {
            return false;
        }
        self.recompute_effective()
    }

    /// Rebuild the self node's outgoing edges from the live peer set.
    ///
    /// Bumps the version when anything changed; returns whether it did.
    pub fn rebuild_self(&mut self, edges: BTreeMap<NodeId, u32>) -> bool {
        if edges == self.outgoing {
            return false;
        }
        self.outgoing = edges;
        self.version = self.version.wrapping_add(1);
        true
    }

    fn recompute_effective(&mut self) -> bool {
        let mut best: Option<&RoutingContribution> = None;
        for contribution in self.contributions.values() {
            best = match best {
                None => Some(contribution),
                Some(current) if version_newer(contribution.version, current.version) => {
                    Some(contribution)
                }
                Some(current) => Some(current),
            };
        }

        let new_outgoing: BTreeMap<NodeId, u32> = match best {
            Some(contribution) => contribution.neighbors.iter().cloned().collect(),
            None => BTreeMap::new(),
        };
        let new_version = best.map(|c| c.version);

        let changed = new_outgoing != self.outgoing;
        self.outgoing = new_outgoing;
        if let Some(version) = new_version {
            self.version = version;
        }
        changed
    }
}

impl fmt::Debug for TopologyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopologyNode")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("direct", &self.direct)
            .field("edges", &self.outgoing.len())
            .field("advertisers", &self.contributions.len())
            .finish()
    }
}
