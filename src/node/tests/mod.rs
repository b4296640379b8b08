//! Integration scenarios on a deterministic in-memory mesh.
//!
//! The harness pumps frames between engines by hand and advances a
//! simulated clock, so every scenario is reproducible without a runtime.
//! Each delivery round moves the clock a few milliseconds to model
//! transit delay; timers run through explicit `advance` calls.

use super::*;
use crate::auth::AnonymousAuth;
use crate::transport::memory;
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;


/// Simulated per-hop transit delay.
const HOP_DELAY_MS: u64 = 5;

/// Clock step used by [`Mesh::advance`].
const ADVANCE_STEP_MS: u64 = 50;

pub(super) fn make_id(val: u8) -> NodeId {
    NodeId::from_bytes(vec![val; 4])
}

pub(super) fn anonymous_registry() -> AuthRegistry {
    AuthRegistry::new().with(Arc::new(AnonymousAuth))
}

pub(super) fn make_network(id_val: u8) -> Network {
    Network::new(make_id(id_val), NetworkConfig::default(), anonymous_registry()).unwrap()
}

struct LinkSlot {
    link: LinkId,
    rx: crate::transport::FrameReceiver,
    peer_node: usize,
    dead: bool,
}

struct TestNode {
    network: Network,
    links: Vec<LinkSlot>,
    events: Vec<NetworkEvent>,
    /// Drop every frame addressed to this node (simulated blackhole).
    isolated: bool,
}

/// A frame observed in flight, before the receiver handled it.
pub(super) struct CapturedFrame {
    pub from: usize,
    pub to: usize,
    pub frame: Frame,
}

pub(super) struct Mesh {
    nodes: Vec<TestNode>,
    now_ms: u64,
    pub captured: Vec<CapturedFrame>,
}

impl Mesh {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            now_ms: 1_000,
            captured: Vec::new(),
        }
    }

    pub fn now(&self) -> u64 {
        self.now_ms
    }

    pub fn add_node(&mut self, id_val: u8) -> usize {
        self.add_network(make_network(id_val))
    }

    pub fn add_network(&mut self, network: Network) -> usize {
        self.nodes.push(TestNode {
            network,
            links: Vec::new(),
            events: Vec::new(),
            isolated: false,
        });
        self.nodes.len() - 1
    }

    pub fn network(&self, node: usize) -> &Network {
        &self.nodes[node].network
    }

    /// Connect two nodes; `a` initiates. Pumps until the mesh is quiet.
    /// Returns the link ids on each side.
    pub fn connect(&mut self, a: usize, b: usize) -> (LinkId, LinkId) {
        let (link_a, link_b) = memory::pair();

        let now = self.now_ms;
        let (id_a, rx_a, events_a) = self.nodes[a].network.attach(link_a, now);
        self.nodes[a].events.extend(events_a);
        self.nodes[a].links.push(LinkSlot {
            link: id_a,
            rx: rx_a,
            peer_node: b,
            dead: false,
        });

        let (id_b, rx_b, events_b) = self.nodes[b].network.attach(link_b, now);
        self.nodes[b].events.extend(events_b);
        self.nodes[b].links.push(LinkSlot {
            link: id_b,
            rx: rx_b,
            peer_node: a,
            dead: false,
        });

        self.pump();
        (id_a, id_b)
    }

    /// Manually disconnect a link from one side.
    pub fn disconnect(&mut self, node: usize, link: LinkId) {
        let now = self.now_ms;
        let events = self.nodes[node].network.disconnect(link, now);
        self.nodes[node].events.extend(events);
        self.pump();
    }

    /// Stop delivering frames to this node without closing its links.
    pub fn isolate(&mut self, node: usize) {
        self.nodes[node].isolated = true;
    }

    /// Send from `node` toward `target`; pumps afterwards.
    pub fn send(
        &mut self,
        node: usize,
        target: NodeId,
        kind: &str,
        payload: Vec<u8>,
    ) -> crate::messaging::SendReceipt {
        let now = self.now_ms;
        let (receipt, events) = self.nodes[node].network.send(target, kind, payload, now);
        self.nodes[node].events.extend(events);
        self.pump();
        receipt
    }

    /// Deliver queued frames until nothing moves. Each round of
    /// deliveries advances the clock by [`HOP_DELAY_MS`].
    pub fn pump(&mut self) {
        loop {
            let mut moved = false;
            for node_idx in 0..self.nodes.len() {
                for slot_idx in 0..self.nodes[node_idx].links.len() {
                    let (link, peer_node, received) = {
                        let slot = &mut self.nodes[node_idx].links[slot_idx];
                        if slot.dead {
                            continue;
                        }
                        match slot.rx.try_recv() {
                            Ok(frame) => (slot.link, slot.peer_node, Some(frame)),
                            Err(TryRecvError::Empty) => continue,
                            Err(TryRecvError::Disconnected) => {
                                slot.dead = true;
                                (slot.link, slot.peer_node, None)
                            }
                        }
                    };
                    moved = true;
                    let now = self.now_ms;

                    match received {
                        Some(frame) => {
                            self.captured.push(CapturedFrame {
                                from: peer_node,
                                to: node_idx,
                                frame: frame.clone(),
                            });
                            if self.nodes[node_idx].isolated {
                                continue;
                            }
                            let events =
                                self.nodes[node_idx].network.handle_frame(link, frame, now);
                            self.nodes[node_idx].events.extend(events);
                        }
                        None => {
                            let events =
                                self.nodes[node_idx].network.handle_link_closed(link, now);
                            self.nodes[node_idx].events.extend(events);
                        }
                    }
                }
            }
            if !moved {
                break;
            }
            self.now_ms += HOP_DELAY_MS;
        }
    }

    /// Move the clock forward, ticking every node and pumping between
    /// steps.
    pub fn advance(&mut self, ms: u64) {
        let target = self.now_ms + ms;
        while self.now_ms < target {
            let step = ADVANCE_STEP_MS.min(target - self.now_ms);
            self.now_ms += step;
            for node_idx in 0..self.nodes.len() {
                let now = self.now_ms;
                let events = self.nodes[node_idx].network.tick(now);
                self.nodes[node_idx].events.extend(events);
            }
            self.pump();
        }
    }

    /// Drain the events a node accumulated.
    #[allow(dead_code)]
    pub fn take_events(&mut self, node: usize) -> Vec<NetworkEvent> {
        std::mem::take(&mut self.nodes[node].events)
    }

    /// Check whether a drained-or-pending event matches, consuming
    /// nothing (looks at the accumulated, undrained list).
    pub fn has_event<F>(&self, node: usize, predicate: F) -> bool
    where
        F: Fn(&NetworkEvent) -> bool,
    {
        self.nodes[node].events.iter().any(predicate)
    }

    /// Frames captured in flight from one node to another.
    pub fn captured_between(&self, from: usize, to: usize) -> Vec<&Frame> {
        self.captured
            .iter()
            .filter(|c| c.from == from && c.to == to)
            .map(|c| &c.frame)
            .collect()
    }
}
