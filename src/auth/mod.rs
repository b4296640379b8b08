//! Pluggable peer authentication.
//!
//! Negotiation hands off to an authentication provider after the identity
//! exchange. Providers are tried by the client in configured order; each
//! attempt runs a short challenge/response flow whose replies drive the
//! peer state machine.
//!
//! Two providers ship with the crate: [`AnonymousAuth`] (accept anyone)
//! and [`SharedSecretAuth`] (digest over a server challenge).

mod anonymous;
mod shared_secret;

pub use anonymous::AnonymousAuth;
pub use shared_secret::SharedSecretAuth;

use std::fmt;
use std::sync::Arc;

/// Channel-binding material a transport may supply to auth flows.
#[derive(Clone, Debug, Default)]
pub struct AuthContext {
    /// Public security parameter of the local transport end (e.g. a TLS
    /// certificate fingerprint), when the transport has one.
    pub local_public_security: Option<Vec<u8>>,
    /// Public security parameter of the remote transport end.
    pub remote_public_security: Option<Vec<u8>>,
}

/// Reply from a client-side auth flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientReply {
    /// Continue the exchange with this data.
    Data(Vec<u8>),
    /// The flow cannot proceed; rotate to the next provider.
    Reject,
}

/// Reply from a server-side auth flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerReply {
    /// The client is authenticated.
    Ok,
    /// The attempt is rejected; the client may try another provider.
    Reject,
    /// Continue the exchange with this data. Must be non-empty.
    Data(Vec<u8>),
}

/// Client side of one authentication attempt.
///
/// One flow instance is scoped to one provider attempt; dropping it
/// releases any state it holds.
pub trait ClientFlow: Send {
    /// Produce the initial data for the Auth frame.
    fn initial_message(&mut self) -> Vec<u8>;

    /// Process data received from the server.
    fn receive_data(&mut self, data: &[u8]) -> ClientReply;
}

/// Server side of one authentication attempt.
pub trait ServerFlow: Send {
    /// Process the initial data from the client's Auth frame.
    fn receive_initial(&mut self, data: &[u8]) -> ServerReply;

    /// Process continuation data from the client.
    fn receive_data(&mut self, data: &[u8]) -> ServerReply;
}

/// An authentication method usable during negotiation.
///
/// A provider may support only one side; the default implementations
/// decline, which makes the client skip it and the server reject it.
pub trait AuthProvider: Send + Sync {
    /// Method identifier carried in Auth frames.
    fn id(&self) -> &str;

    /// Create the client side of an attempt, if supported.
    fn create_client_flow(&self, _ctx: &AuthContext) -> Option<Box<dyn ClientFlow>> {
        None
    }

    /// Create the server side of an attempt, if supported.
    fn create_server_flow(&self, _ctx: &AuthContext) -> Option<Box<dyn ServerFlow>> {
        None
    }
}

/// Ordered registry of authentication providers.
///
/// The order of registration is the order clients attempt providers in.
#[derive(Clone, Default)]
pub struct AuthRegistry {
    providers: Vec<Arc<dyn AuthProvider>>,
}

impl AuthRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider. Later registrations are tried later.
    pub fn register(&mut self, provider: Arc<dyn AuthProvider>) {
        self.providers.push(provider);
    }

    /// Builder-style registration.
    pub fn with(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Look up a provider by method id.
    pub fn provider(&self, method: &str) -> Option<Arc<dyn AuthProvider>> {
        self.providers.iter().find(|p| p.id() == method).cloned()
    }

    /// All providers in configured order.
    pub fn providers(&self) -> &[Arc<dyn AuthProvider>] {
        &self.providers
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Check whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for AuthRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.providers.iter().map(|p| p.id()).collect();
        f.debug_struct("AuthRegistry").field("providers", &ids).finish()
    }
}
