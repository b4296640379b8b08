//! Peer negotiation state machine.
//!
//! Drives one link from transport-up to Active: identity exchange
//! (Hello/Select), authentication hand-off (Auth/AuthData with provider
//! rotation on the client), activation (Begin), then keep-alive
//! (Ping/Pong) under an accrual failure detector.
//!
//! The machine is deterministic over (incoming frame, current state) and
//! explicit deadlines. It never touches a transport itself: every entry
//! point returns the [`PeerAction`]s for the caller to execute, in order.

use super::{
    AccrualFailureDetector, DisconnectReason, LatencyError, LatencyTracker, PeerRole, PeerState,
};
use crate::auth::{AuthContext, AuthProvider, AuthRegistry, ClientFlow, ClientReply, ServerFlow, ServerReply};
use crate::config::NetworkConfig;
use crate::identity::NodeId;
use crate::protocol::{Frame, PROTOCOL_VERSION};
use crate::transport::LinkId;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Instruction produced by the state machine for the caller to execute.
#[derive(Debug)]
pub enum PeerAction {
    /// Send this frame on the peer's link.
    Send(Frame),
    /// The peer just became Active.
    Connected,
    /// Surface this frame to the routing/data layers.
    Deliver(Frame),
    /// Tear the peer down for this reason.
    Disconnect(DisconnectReason),
}

/// State machine for one peer link.
pub struct Peer {
    link: LinkId,
    role: PeerRole,
    local_id: NodeId,
    remote_id: NodeId,
    state: PeerState,
    version: Option<u8>,
    remote_capabilities: BTreeSet<String>,

    latency: LatencyTracker,
    latency_send_at: Option<u64>,
    detector: AccrualFailureDetector,

    negotiation_deadline_ms: Option<u64>,
    next_ping_at_ms: Option<u64>,
    next_ping_check_at_ms: Option<u64>,

    auth: AuthRegistry,
    auth_ctx: AuthContext,
    client_flow: Option<Box<dyn ClientFlow>>,
    server_flow: Option<Box<dyn ServerFlow>>,
    provider_queue: VecDeque<Arc<dyn AuthProvider>>,

    negotiation_timeout_ms: u64,
    ping_interval_ms: u64,
    ping_check_interval_ms: u64,
}

impl Peer {
    /// Create a peer for a link. Call [`start`](Peer::start) once the
    /// transport reports the link up.
    pub fn new(
        link: LinkId,
        role: PeerRole,
        local_id: NodeId,
        auth: AuthRegistry,
        auth_ctx: AuthContext,
        config: &NetworkConfig,
    ) -> Self {
        Self {
            link,
            role,
            local_id,
            remote_id: NodeId::none(),
            state: PeerState::Initial,
            version: None,
            remote_capabilities: BTreeSet::new(),
            latency: LatencyTracker::new(),
            latency_send_at: None,
            detector: AccrualFailureDetector::new(config.ping_interval_ms),
            negotiation_deadline_ms: None,
            next_ping_at_ms: None,
            next_ping_check_at_ms: None,
            auth,
            auth_ctx,
            client_flow: None,
            server_flow: None,
            provider_queue: VecDeque::new(),
            negotiation_timeout_ms: config.negotiation_timeout_ms,
            ping_interval_ms: config.ping_interval_ms,
            ping_check_interval_ms: config.ping_check_interval_ms,
        }
    }

    // === Accessors ===

    /// The link this peer lives on.
    pub fn link(&self) -> LinkId {
        self.link
    }

    /// Negotiation role.
    pub fn role(&self) -> PeerRole {
        self.role
    }

    /// Current state.
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Check if the peer is Active.
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Remote identity; [`NodeId::none`] until the identity exchange.
    pub fn remote_id(&self) -> &NodeId {
        &self.remote_id
    }

    /// Negotiated protocol version, once known.
    pub fn version(&self) -> Option<u8> {
        self.version
    }

    /// Capability set the remote announced. Currently informational.
    pub fn remote_capabilities(&self) -> &BTreeSet<String> {
        &self.remote_capabilities
    }

    /// Mean round-trip latency in milliseconds.
    pub fn latency(&self) -> Result<u64, LatencyError> {
        self.latency.latency()
    }

    // === Lifecycle ===

    /// Transport reported the link up: begin negotiating.
    pub fn start(&mut self, now_ms: u64) -> Vec<PeerAction> {
        self.arm_negotiation_deadline(now_ms);
        match self.role {
            PeerRole::Server => {
                self.state = PeerState::WaitingForSelect;
                vec![PeerAction::Send(Frame::Hello {
                    id: self.local_id.clone(),
                    capabilities: BTreeSet::new(),
                })]
            }
            PeerRole::Client => {
                self.state = PeerState::WaitingForHello;
                self.latency_send_at = Some(now_ms);
                Vec::new()
            }
        }
    }

    /// Feed one incoming frame through the state machine.
    pub fn handle_frame(&mut self, frame: Frame, now_ms: u64) -> Vec<PeerAction> {
        // Bye is honored in any state.
        if matches!(frame, Frame::Bye) {
            debug!(link = %self.link, state = %self.state, "Peer requested disconnect");
            return vec![PeerAction::Disconnect(DisconnectReason::Manual)];
        }

        if self.state.is_negotiating() {
            // Every received negotiation frame buys the peer more time.
            self.arm_negotiation_deadline(now_ms);
            return self.handle_negotiation_frame(frame, now_ms);
        }

        match frame {
            Frame::Ping => {
                self.detector.heartbeat(now_ms);
                vec![PeerAction::Send(Frame::Pong)]
            }
            Frame::Pong => {
                self.record_latency_reply(now_ms);
                Vec::new()
            }
            frame if frame.is_active_frame() => vec![PeerAction::Deliver(frame)],
            frame => self.abort_protocol(&frame),
        }
    }

    fn handle_negotiation_frame(&mut self, frame: Frame, now_ms: u64) -> Vec<PeerAction> {
        match (self.role, self.state, frame) {
            // --- Server side ---
            (PeerRole::Server, PeerState::WaitingForSelect, Frame::Select { id, capabilities }) => {
                if let Some(actions) = self.check_remote_id(&id) {
                    return actions;
                }
                self.remote_id = id;
                self.remote_capabilities = capabilities;
                self.version = Some(PROTOCOL_VERSION);
                self.state = PeerState::WaitingForAuth;
                vec![PeerAction::Send(Frame::Ok)]
            }
            (PeerRole::Server, PeerState::WaitingForAuth, Frame::Auth { method, data }) => {
                let flow = self
                    .auth
                    .provider(&method)
                    .and_then(|p| p.create_server_flow(&self.auth_ctx));
                match flow {
                    Some(mut flow) => {
                        let reply = flow.receive_initial(&data);
                        self.apply_server_reply(flow, reply)
                    }
                    None => {
                        debug!(link = %self.link, method = %method, "No server flow for auth method");
                        vec![PeerAction::Send(Frame::Reject)]
                    }
                }
            }
            (PeerRole::Server, PeerState::WaitingForAuthData, Frame::AuthData { data }) => {
                match self.server_flow.take() {
                    Some(mut flow) => {
                        let reply = flow.receive_data(&data);
                        self.apply_server_reply(flow, reply)
                    }
                    None => self.abort_protocol(&Frame::AuthData { data }),
                }
            }
            (PeerRole::Server, PeerState::WaitingForBegin, Frame::Begin) => self.activate(now_ms),

            // --- Client side ---
            (PeerRole::Client, PeerState::WaitingForHello, Frame::Hello { id, capabilities }) => {
                if let Some(actions) = self.check_remote_id(&id) {
                    return actions;
                }
                self.remote_id = id;
                self.remote_capabilities = capabilities;
                self.version = Some(PROTOCOL_VERSION);
                self.record_latency_reply(now_ms);
                self.state = PeerState::WaitingForSelectAck;
                self.latency_send_at = Some(now_ms);
                vec![PeerAction::Send(Frame::Select {
                    id: self.local_id.clone(),
                    capabilities: BTreeSet::new(),
                })]
            }
            (PeerRole::Client, PeerState::WaitingForSelectAck, Frame::Ok) => {
                self.record_latency_reply(now_ms);
                self.state = PeerState::WaitingForAuthAck;
                self.provider_queue = self.auth.providers().iter().cloned().collect();
                self.advance_client_auth()
            }
            (PeerRole::Client, PeerState::WaitingForSelectAck, Frame::Reject) => {
                debug!(link = %self.link, "Select rejected");
                vec![PeerAction::Disconnect(DisconnectReason::NegotiationFailed)]
            }
            (PeerRole::Client, PeerState::WaitingForAuthAck, Frame::AuthData { data }) => {
                let reply = match self.client_flow.as_mut() {
                    Some(flow) => flow.receive_data(&data),
                    None => return self.abort_protocol(&Frame::AuthData { data }),
                };
                match reply {
                    ClientReply::Data(out) => {
                        vec![PeerAction::Send(Frame::AuthData { data: out })]
                    }
                    ClientReply::Reject => self.advance_client_auth(),
                }
            }
            (PeerRole::Client, PeerState::WaitingForAuthAck, Frame::Ok) => {
                let mut actions = self.activate(now_ms);
                // Begin goes out after the transition: this side counts as
                // connected even if the send fails.
                actions.insert(0, PeerAction::Send(Frame::Begin));
                actions
            }
            (PeerRole::Client, PeerState::WaitingForAuthAck, Frame::Reject) => {
                self.advance_client_auth()
            }

            (_, _, frame) => self.abort_protocol(&frame),
        }
    }

    /// Run the peer's timers against the current clock.
    pub fn poll(&mut self, now_ms: u64) -> Vec<PeerAction> {
        if let Some(deadline) = self.negotiation_deadline_ms {
            if now_ms >= deadline {
                warn!(link = %self.link, state = %self.state, "Negotiation timed out");
                return vec![PeerAction::Disconnect(DisconnectReason::NegotiationFailed)];
            }
        }

        if !self.state.is_active() {
            return Vec::new();
        }

        let mut actions = Vec::new();

        if let Some(at) = self.next_ping_at_ms {
            if now_ms >= at {
                self.next_ping_at_ms = Some(now_ms + self.ping_interval_ms);
                self.latency_send_at = Some(now_ms);
                actions.push(PeerAction::Send(Frame::Ping));
            }
        }

        if let Some(at) = self.next_ping_check_at_ms {
            if now_ms >= at {
                self.next_ping_check_at_ms = Some(now_ms + self.ping_check_interval_ms);
                if self.detector.check_failure(now_ms) {
                    warn!(link = %self.link, peer = %self.remote_id, "Failure detector tripped");
                    actions.push(PeerAction::Disconnect(DisconnectReason::PingTimeout));
                }
            }
        }

        actions
    }

    // === Internals ===

    fn arm_negotiation_deadline(&mut self, now_ms: u64) {
        self.negotiation_deadline_ms = Some(now_ms + self.negotiation_timeout_ms);
    }

    /// A link carrying our own id is a link to ourselves: refuse it.
    fn check_remote_id(&mut self, id: &NodeId) -> Option<Vec<PeerAction>> {
        if *id == self.local_id {
            warn!(link = %self.link, "Rejecting link to self");
            return Some(vec![PeerAction::Disconnect(
                DisconnectReason::NegotiationFailed,
            )]);
        }
        if id.is_none() {
            return Some(vec![PeerAction::Disconnect(
                DisconnectReason::NegotiationFailed,
            )]);
        }
        None
    }

    fn record_latency_reply(&mut self, now_ms: u64) {
        if let Some(sent_at) = self.latency_send_at.take() {
            self.latency.record(now_ms.saturating_sub(sent_at));
        }
    }

    fn apply_server_reply(
        &mut self,
        flow: Box<dyn ServerFlow>,
        reply: ServerReply,
    ) -> Vec<PeerAction> {
        match reply {
            ServerReply::Ok => {
                self.state = PeerState::WaitingForBegin;
                vec![PeerAction::Send(Frame::Ok)]
            }
            ServerReply::Reject => {
                self.state = PeerState::WaitingForAuth;
                vec![PeerAction::Send(Frame::Reject)]
            }
            ServerReply::Data(data) => {
                if data.is_empty() {
                    debug!(link = %self.link, "Server auth flow produced empty data");
                    return vec![PeerAction::Disconnect(DisconnectReason::NegotiationFailed)];
                }
                self.server_flow = Some(flow);
                self.state = PeerState::WaitingForAuthData;
                vec![PeerAction::Send(Frame::AuthData { data })]
            }
        }
    }

    /// Try the next configured provider, skipping those without a client
    /// flow. Exhaustion means the server refused every method we have.
    fn advance_client_auth(&mut self) -> Vec<PeerAction> {
        self.client_flow = None;

        while let Some(provider) = self.provider_queue.pop_front() {
            if let Some(mut flow) = provider.create_client_flow(&self.auth_ctx) {
                let data = flow.initial_message();
                self.client_flow = Some(flow);
                debug!(link = %self.link, method = provider.id(), "Attempting auth provider");
                return vec![PeerAction::Send(Frame::Auth {
                    method: provider.id().to_string(),
                    data,
                })];
            }
        }

        debug!(link = %self.link, "Auth providers exhausted");
        vec![PeerAction::Disconnect(DisconnectReason::AuthReject)]
    }

    fn activate(&mut self, now_ms: u64) -> Vec<PeerAction> {
        self.state = PeerState::Active;
        self.negotiation_deadline_ms = None;
        self.client_flow = None;
        self.server_flow = None;
        self.provider_queue.clear();
        self.next_ping_at_ms = Some(now_ms + self.ping_interval_ms);
        self.next_ping_check_at_ms = Some(now_ms + self.ping_check_interval_ms);
        self.detector.heartbeat(now_ms);
        debug!(link = %self.link, peer = %self.remote_id, role = %self.role, "Peer active");
        vec![PeerAction::Connected]
    }

    fn abort_protocol(&mut self, frame: &Frame) -> Vec<PeerAction> {
        warn!(
            link = %self.link,
            state = %self.state,
            frame = frame.type_name(),
            "Unexpected frame, aborting peer"
        );
        vec![PeerAction::Disconnect(DisconnectReason::NegotiationFailed)]
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("link", &self.link)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("remote_id", &self.remote_id)
            .field("samples", &self.latency.sample_count())
            .finish()
    }
}
