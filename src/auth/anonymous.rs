//! Anonymous authentication.
//!
//! Accepts any peer without proof. Useful for closed transports (local
//! IPC) and tests; real deployments pair it with channel security or
//! replace it entirely.

use super::{AuthContext, AuthProvider, ClientFlow, ClientReply, ServerFlow, ServerReply};

/// Provider that authenticates everyone.
pub struct AnonymousAuth;

impl AuthProvider for AnonymousAuth {
    fn id(&self) -> &str {
        "anonymous"
    }

    fn create_client_flow(&self, _ctx: &AuthContext) -> Option<Box<dyn ClientFlow>> {
        Some(Box::new(AnonymousClientFlow))
    }

    fn create_server_flow(&self, _ctx: &AuthContext) -> Option<Box<dyn ServerFlow>> {
        Some(Box::new(AnonymousServerFlow))
    }
}

struct AnonymousClientFlow;

impl ClientFlow for AnonymousClientFlow {
    fn initial_message(&mut self) -> Vec<u8> {
        Vec::new()
    }

    fn receive_data(&mut self, _data: &[u8]) -> ClientReply {
        // The server accepts or rejects immediately; continuation data
        // means the peer is running a different flow.
        ClientReply::Reject
    }
}

struct AnonymousServerFlow;

impl ServerFlow for AnonymousServerFlow {
    fn receive_initial(&mut self, _data: &[u8]) -> ServerReply {
        ServerReply::Ok
    }

    fn receive_data(&mut self, _data: &[u8]) -> ServerReply {
        ServerReply::Reject
    }
}
