//! Source-routed application messaging.
//!
//! Outbound payloads ride `Data` frames whose `path` records every node
//! they traverse; acknowledgements and rejections retrace that path in
//! reverse. The sender's completion resolves on ack and rejects on a
//! reject frame or the request deadline.
//!
//! Forwarding is stateless: transit nodes keep no per-request records,
//! so a lost reverse hop simply drops (no cascading errors).

use crate::identity::NodeId;
use crate::protocol::{Frame, RejectCode};
use crate::topology::Topology;
use crate::transport::LinkId;
use crate::util::RequestReplyHelper;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Why an outbound send failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("no route to target")]
    NoRoute,

    #[error("routing loop detected")]
    Loop,

    #[error("Timed out")]
    Timeout,

    #[error("rejected by remote peer")]
    PeerRejected,
}

impl SendError {
    fn from_code(code: RejectCode) -> Self {
        match code {
            RejectCode::NoRoute | RejectCode::HopLimit => SendError::NoRoute,
            RejectCode::Loop => SendError::Loop,
            RejectCode::Rejected => SendError::PeerRejected,
        }
    }
}

/// Completion channel for one outbound send.
pub type SendReceipt = oneshot::Receiver<Result<(), SendError>>;

/// Output of a messaging operation, for the caller to execute.
#[derive(Debug)]
pub enum MessagingEvent {
    /// Send a frame on a peer link.
    SendFrame { link: LinkId, frame: Frame },
    /// Deliver a payload to the local application.
    Deliver {
        source: NodeId,
        kind: String,
        payload: Vec<u8>,
    },
}

/// The data plane: send, forward, deliver, acknowledge.
pub struct Messaging {
    self_id: NodeId,
    hop_limit: usize,
    requests: RequestReplyHelper<(), SendError>,
}

impl Messaging {
    /// Create the messaging layer for the local node.
    pub fn new(self_id: NodeId, hop_limit: usize, request_timeout_ms: u64) -> Self {
        Self {
            self_id,
            hop_limit,
            requests: RequestReplyHelper::new(request_timeout_ms, SendError::Timeout),
        }
    }

    /// Number of sends awaiting completion.
    pub fn pending_count(&self) -> usize {
        self.requests.pending_count()
    }

    /// Send a payload toward `target`.
    ///
    /// The returned receipt resolves when the target acknowledges and
    /// rejects on a reject frame or the request deadline. Unreachable
    /// targets reject immediately with [`SendError::NoRoute`].
    pub fn send(
        &mut self,
        topology: &Topology,
        target: NodeId,
        kind: &str,
        payload: Vec<u8>,
        now_ms: u64,
    ) -> (SendReceipt, Vec<MessagingEvent>) {
        let (id, receipt) = self.requests.prepare_request(now_ms);

        // Local target short-circuits the routing table entirely.
        if target == self.self_id {
            let events = vec![MessagingEvent::Deliver {
                source: self.self_id.clone(),
                kind: kind.to_string(),
                payload,
            }];
            self.requests.register_reply(id, ());
            return (receipt, events);
        }

        let route = match topology.next_hop(&target) {
            Some(route) => route,
            None => {
                debug!(target = %target, "No route for outbound message");
                self.requests.register_error(id, SendError::NoRoute);
                return (receipt, Vec::new());
            }
        };

        trace!(target = %target, id, via = %route.first_hop, "Sending data");
        let events = vec![MessagingEvent::SendFrame {
            link: route.link,
            frame: Frame::Data {
                source: self.self_id.clone(),
                target,
                id,
                kind: kind.to_string(),
                path: vec![self.self_id.clone()],
                payload,
            },
        }];
        (receipt, events)
    }

    /// Handle an incoming Data frame: deliver, reject, or forward.
    #[allow(clippy::too_many_arguments)]
    pub fn handle_data(
        &mut self,
        topology: &Topology,
        from_link: LinkId,
        source: NodeId,
        target: NodeId,
        id: u32,
        kind: String,
        mut path: Vec<NodeId>,
        payload: Vec<u8>,
    ) -> Vec<MessagingEvent> {
        if target == self.self_id {
            // Acknowledge to the upstream peer, then hand the payload up.
            return vec![
                MessagingEvent::SendFrame {
                    link: from_link,
                    frame: Frame::DataAck {
                        id,
                        target: source.clone(),
                        path,
                    },
                },
                MessagingEvent::Deliver {
                    source,
                    kind,
                    payload,
                },
            ];
        }

        if path.contains(&self.self_id) {
            debug!(source = %source, target = %target, id, "Routing loop, rejecting");
            return self.reject(from_link, id, source, path, RejectCode::Loop);
        }

        if path.len() >= self.hop_limit {
            debug!(source = %source, target = %target, id, "Hop limit reached, rejecting");
            return self.reject(from_link, id, source, path, RejectCode::HopLimit);
        }

        let route = match topology.next_hop(&target) {
            Some(route) => route,
            None => {
                debug!(source = %source, target = %target, id, "No route, rejecting");
                return self.reject(from_link, id, source, path, RejectCode::NoRoute);
            }
        };

        path.push(self.self_id.clone());
        trace!(target = %target, id, via = %route.first_hop, "Forwarding data");
        vec![MessagingEvent::SendFrame {
            link: route.link,
            frame: Frame::Data {
                source,
                target,
                id,
                kind,
                path,
                payload,
            },
        }]
    }

    /// Handle a DataAck: resolve locally or pass it back along the path.
    pub fn handle_ack(
        &mut self,
        topology: &Topology,
        id: u32,
        target: NodeId,
        path: Vec<NodeId>,
    ) -> Vec<MessagingEvent> {
        if target == self.self_id {
            self.requests.register_reply(id, ());
            return Vec::new();
        }
        self.backtrack(topology, Frame::DataAck { id, target, path })
    }

    /// Handle a DataReject: resolve locally or pass it back along the path.
    pub fn handle_reject(
        &mut self,
        topology: &Topology,
        id: u32,
        target: NodeId,
        path: Vec<NodeId>,
        code: RejectCode,
    ) -> Vec<MessagingEvent> {
        if target == self.self_id {
            self.requests.register_error(id, SendError::from_code(code));
            return Vec::new();
        }
        self.backtrack(
            topology,
            Frame::DataReject {
                id,
                target,
                path,
                code,
            },
        )
    }

    /// Reject timed-out sends. Returns how many fired.
    pub fn poll(&mut self, now_ms: u64) -> usize {
        self.requests.poll_timeouts(now_ms)
    }

    fn reject(
        &self,
        from_link: LinkId,
        id: u32,
        source: NodeId,
        path: Vec<NodeId>,
        code: RejectCode,
    ) -> Vec<MessagingEvent> {
        vec![MessagingEvent::SendFrame {
            link: from_link,
            frame: Frame::DataReject {
                id,
                target: source,
                path,
                code,
            },
        }]
    }

    /// Route an ack/reject one hop closer to its target using the
    /// recorded path: the entry before ourselves is the next hop back.
    fn backtrack(&self, topology: &Topology, frame: Frame) -> Vec<MessagingEvent> {
        let path = match &frame {
            Frame::DataAck { path, .. } | Frame::DataReject { path, .. } => path,
            _ => return Vec::new(),
        };

        let position = match path.iter().position(|id| *id == self.self_id) {
            Some(position) if position > 0 => position,
            _ => {
                debug!(frame = frame.type_name(), "Cannot backtrack, dropping");
                return Vec::new();
            }
        };

        match topology.link_for(&path[position - 1]) {
            Some(link) => vec![MessagingEvent::SendFrame { link, frame }],
            None => {
                debug!(frame = frame.type_name(), "Reverse hop gone, dropping");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LinkId;

    fn make_id(val: u8) -> NodeId {
        NodeId::from_bytes(vec![val; 4])
    }

    /// Topology with one direct peer (id 1, link 1) that also advertises
    /// a two-hop target (id 7).
    fn make_topology() -> Topology {
        let mut topology = Topology::new(make_id(0), false, 100);
        topology.add_peer(LinkId::new(1), make_id(1), 100, 0);
        topology.handle_details(
            LinkId::new(1),
            vec![crate::protocol::NodeRouting {
                id: make_id(1),
                version: 1,
                neighbors: vec![crate::protocol::Neighbor {
                    id: make_id(7),
                    latency: 50,
                }],
            }],
            0,
        );
        topology
    }

    fn make_messaging() -> Messaging {
        Messaging::new(make_id(0), 16, 30_000)
    }

    #[test]
    fn test_send_builds_data_frame() {
        let topology = make_topology();
        let mut messaging = make_messaging();

        let (_receipt, events) =
            messaging.send(&topology, make_id(7), "test", vec![1, 2], 1_000);

        match &events[..] {
            [MessagingEvent::SendFrame { link, frame }] => {
                assert_eq!(*link, LinkId::new(1));
                match frame {
                    Frame::Data {
                        source,
                        target,
                        path,
                        ..
                    } => {
                        assert_eq!(*source, make_id(0));
                        assert_eq!(*target, make_id(7));
                        assert_eq!(*path, vec![make_id(0)]);
                    }
                    other => panic!("expected Data, got {}", other.type_name()),
                }
            }
            other => panic!("unexpected events: {:?}", other),
        }
        assert_eq!(messaging.pending_count(), 1);
    }

    #[test]
    fn test_send_without_route_rejects_immediately() {
        let topology = make_topology();
        let mut messaging = make_messaging();

        let (mut receipt, events) =
            messaging.send(&topology, make_id(99), "test", vec![], 1_000);
        assert!(events.is_empty());
        assert_eq!(receipt.try_recv().unwrap(), Err(SendError::NoRoute));
    }

    #[test]
    fn test_send_to_self_delivers_locally() {
        let topology = make_topology();
        let mut messaging = make_messaging();

        let (mut receipt, events) =
            messaging.send(&topology, make_id(0), "test", vec![9], 1_000);
        assert!(matches!(&events[..], [MessagingEvent::Deliver { .. }]));
        assert_eq!(receipt.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_delivery_acks_upstream() {
        let topology = make_topology();
        let mut messaging = make_messaging();

        let events = messaging.handle_data(
            &topology,
            LinkId::new(1),
            make_id(7),
            make_id(0),
            5,
            "test".into(),
            vec![make_id(7), make_id(1)],
            vec![0xff],
        );

        assert_eq!(events.len(), 2);
        match &events[0] {
            MessagingEvent::SendFrame { link, frame } => {
                assert_eq!(*link, LinkId::new(1));
                match frame {
                    Frame::DataAck { id, target, path } => {
                        assert_eq!(*id, 5);
                        assert_eq!(*target, make_id(7));
                        assert_eq!(*path, vec![make_id(7), make_id(1)]);
                    }
                    other => panic!("expected ack, got {}", other.type_name()),
                }
            }
            other => panic!("expected frame, got {:?}", other),
        }
        match &events[1] {
            MessagingEvent::Deliver {
                source,
                kind,
                payload,
            } => {
                assert_eq!(*source, make_id(7));
                assert_eq!(kind, "test");
                assert_eq!(*payload, vec![0xff]);
            }
            other => panic!("expected delivery, got {:?}", other),
        }
    }

    #[test]
    fn test_forward_appends_self_to_path() {
        let topology = make_topology();
        let mut messaging = make_messaging();

        let events = messaging.handle_data(
            &topology,
            LinkId::new(9),
            make_id(8),
            make_id(7),
            3,
            "t".into(),
            vec![make_id(8)],
            vec![],
        );

        match &events[..] {
            [MessagingEvent::SendFrame { link, frame }] => {
                assert_eq!(*link, LinkId::new(1));
                match frame {
                    Frame::Data { path, .. } => {
                        assert_eq!(*path, vec![make_id(8), make_id(0)]);
                    }
                    other => panic!("expected Data, got {}", other.type_name()),
                }
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_loop_rejected() {
        let topology = make_topology();
        let mut messaging = make_messaging();

        // Our own id already sits in the path.
        let events = messaging.handle_data(
            &topology,
            LinkId::new(9),
            make_id(8),
            make_id(7),
            3,
            "t".into(),
            vec![make_id(8), make_id(0), make_id(2)],
            vec![],
        );

        match &events[..] {
            [MessagingEvent::SendFrame { link, frame }] => {
                assert_eq!(*link, LinkId::new(9));
                assert!(matches!(
                    frame,
                    Frame::DataReject {
                        code: RejectCode::Loop,
                        ..
                    }
                ));
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_no_route_rejected() {
        let topology = make_topology();
        let mut messaging = make_messaging();

        let events = messaging.handle_data(
            &topology,
            LinkId::new(9),
            make_id(8),
            make_id(42),
            3,
            "t".into(),
            vec![make_id(8)],
            vec![],
        );
        assert!(matches!(
            &events[..],
            [MessagingEvent::SendFrame {
                frame: Frame::DataReject {
                    code: RejectCode::NoRoute,
                    ..
                },
                ..
            }]
        ));
    }

    #[test]
    fn test_hop_limit_rejected() {
        let topology = make_topology();
        let mut messaging = Messaging::new(make_id(0), 2, 30_000);

        let events = messaging.handle_data(
            &topology,
            LinkId::new(9),
            make_id(8),
            make_id(7),
            3,
            "t".into(),
            vec![make_id(8), make_id(9)],
            vec![],
        );
        assert!(matches!(
            &events[..],
            [MessagingEvent::SendFrame {
                frame: Frame::DataReject {
                    code: RejectCode::HopLimit,
                    ..
                },
                ..
            }]
        ));
    }

    #[test]
    fn test_ack_resolves_pending_send() {
        let topology = make_topology();
        let mut messaging = make_messaging();

        let (mut receipt, events) =
            messaging.send(&topology, make_id(7), "test", vec![], 1_000);
        let id = match &events[0] {
            MessagingEvent::SendFrame {
                frame: Frame::Data { id, .. },
                ..
            } => *id,
            other => panic!("unexpected event: {:?}", other),
        };

        messaging.handle_ack(&topology, id, make_id(0), vec![make_id(0), make_id(1)]);
        assert_eq!(receipt.try_recv().unwrap(), Ok(()));
        assert_eq!(messaging.pending_count(), 0);
    }

    #[test]
    fn test_reject_maps_codes() {
        let topology = make_topology();
        let mut messaging = make_messaging();

        let (mut receipt, events) =
            messaging.send(&topology, make_id(7), "test", vec![], 1_000);
        let id = match &events[0] {
            MessagingEvent::SendFrame {
                frame: Frame::Data { id, .. },
                ..
            } => *id,
            other => panic!("unexpected event: {:?}", other),
        };

        messaging.handle_reject(
            &topology,
            id,
            make_id(0),
            vec![make_id(0)],
            RejectCode::Loop,
        );
        assert_eq!(receipt.try_recv().unwrap(), Err(SendError::Loop));
    }

    #[test]
    fn test_ack_backtracks_toward_source() {
        let topology = make_topology();
        let mut messaging = make_messaging();

        // We are a transit node: path [1, 0, ...]; previous hop is 1.
        let events = messaging.handle_ack(
            &topology,
            5,
            make_id(1),
            vec![make_id(1), make_id(0), make_id(7)],
        );
        match &events[..] {
            [MessagingEvent::SendFrame { link, frame }] => {
                assert_eq!(*link, LinkId::new(1));
                assert!(matches!(frame, Frame::DataAck { id: 5, .. }));
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_backtrack_with_missing_hop_drops() {
        let topology = make_topology();
        let mut messaging = make_messaging();

        // Previous hop 42 is not a direct peer: dropped silently.
        let events = messaging.handle_ack(
            &topology,
            5,
            make_id(42),
            vec![make_id(42), make_id(0)],
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_timeout_rejects_with_timed_out() {
        let topology = make_topology();
        let mut messaging = make_messaging();

        let (mut receipt, _) = messaging.send(&topology, make_id(7), "test", vec![], 1_000);
        assert_eq!(messaging.poll(30_999), 0);
        assert_eq!(messaging.poll(31_000), 1);

        let error = receipt.try_recv().unwrap().unwrap_err();
        assert_eq!(error, SendError::Timeout);
        assert_eq!(error.to_string(), "Timed out");
    }
}
