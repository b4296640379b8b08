//! Shared-secret authentication.
//!
//! Challenge/response over a pre-shared secret: the server issues a
//! random 32-byte challenge, the client answers with a domain-separated
//! SHA-256 digest over the challenge and the secret, and the server
//! verifies in constant time. The secret itself never crosses the wire.

use super::{AuthContext, AuthProvider, ClientFlow, ClientReply, ServerFlow, ServerReply};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Domain separation string for the response digest.
const SECRET_DOMAIN: &[u8] = b"weft-shared-secret-v1";

const CHALLENGE_LEN: usize = 32;

/// Provider backed by a pre-shared secret.
pub struct SharedSecretAuth {
    secret: Arc<[u8]>,
}

impl SharedSecretAuth {
    /// Create a provider for the given secret.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: Arc::from(secret.into().into_boxed_slice()),
        }
    }
}

impl AuthProvider for SharedSecretAuth {
    fn id(&self) -> &str {
        "shared-secret"
    }

    fn create_client_flow(&self, _ctx: &AuthContext) -> Option<Box<dyn ClientFlow>> {
        Some(Box::new(SharedSecretClientFlow {
            secret: self.secret.clone(),
        }))
    }

    fn create_server_flow(&self, _ctx: &AuthContext) -> Option<Box<dyn ServerFlow>> {
        Some(Box::new(SharedSecretServerFlow {
            secret: self.secret.clone(),
            challenge: None,
        }))
    }
}

/// Compute the response digest for a challenge.
fn response_digest(challenge: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(SECRET_DOMAIN);
    hasher.update(challenge);
    hasher.update(secret);
    hasher.finalize().to_vec()
}

/// Constant-time byte comparison.
fn digest_matches(expected: &[u8], actual: &[u8]) -> bool {
    if expected.len() != actual.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in expected.iter().zip(actual) {
        diff |= a ^ b;
    }
    diff == 0
}

struct SharedSecretClientFlow {
    secret: Arc<[u8]>,
}

impl ClientFlow for SharedSecretClientFlow {
    fn initial_message(&mut self) -> Vec<u8> {
        // The client opens empty and waits for the server's challenge.
        Vec::new()
    }

    fn receive_data(&mut self, data: &[u8]) -> ClientReply {
        if data.len() != CHALLENGE_LEN {
            return ClientReply::Reject;
        }
        ClientReply::Data(response_digest(data, &self.secret))
    }
}

struct SharedSecretServerFlow {
    secret: Arc<[u8]>,
    challenge: Option<[u8; CHALLENGE_LEN]>,
}

impl ServerFlow for SharedSecretServerFlow {
    fn receive_initial(&mut self, _data: &[u8]) -> ServerReply {
        let mut challenge = [0u8; CHALLENGE_LEN];
        rand::thread_rng().fill_bytes(&mut challenge);
        self.challenge = Some(challenge);
        ServerReply::Data(challenge.to_vec())
    }

    fn receive_data(&mut self, data: &[u8]) -> ServerReply {
        let challenge = match self.challenge.take() {
            Some(c) => c,
            None => return ServerReply::Reject,
        };
        let expected = response_digest(&challenge, &self.secret);
        if digest_matches(&expected, data) {
            ServerReply::Ok
        } else {
            ServerReply::Reject
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_exchange(client_secret: &[u8], server_secret: &[u8]) -> ServerReply {
        let ctx = AuthContext::default();
        let mut client = SharedSecretAuth::new(client_secret.to_vec())
            .create_client_flow(&ctx)
            .unwrap();
        let mut server = SharedSecretAuth::new(server_secret.to_vec())
            .create_server_flow(&ctx)
            .unwrap();

        let initial = client.initial_message();
        let challenge = match server.receive_initial(&initial) {
            ServerReply::Data(c) => c,
            other => panic!("expected challenge, got {:?}", other),
        };
        assert_eq!(challenge.len(), CHALLENGE_LEN);

        let response = match client.receive_data(&challenge) {
            ClientReply::Data(r) => r,
            other => panic!("expected response, got {:?}", other),
        };
        server.receive_data(&response)
    }

    #[test]
    fn test_matching_secret_accepted() {
        assert_eq!(run_exchange(b"hunter2", b"hunter2"), ServerReply::Ok);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        assert_eq!(run_exchange(b"hunter2", b"other"), ServerReply::Reject);
    }

    #[test]
    fn test_malformed_challenge_rejected_by_client() {
        let ctx = AuthContext::default();
        let mut client = SharedSecretAuth::new(b"s".to_vec())
            .create_client_flow(&ctx)
            .unwrap();
        assert_eq!(client.receive_data(&[1, 2, 3]), ClientReply::Reject);
    }

    #[test]
    fn test_response_without_challenge_rejected() {
        let ctx = AuthContext::default();
        let mut server = SharedSecretAuth::new(b"s".to_vec())
            .create_server_flow(&ctx)
            .unwrap();
        assert_eq!(server.receive_data(&[0u8; 32]), ServerReply::Reject);
    }

    #[test]
    fn test_digest_matches_is_length_sensitive() {
        assert!(digest_matches(b"abc", b"abc"));
        assert!(!digest_matches(b"abc", b"abd"));
        assert!(!digest_matches(b"abc", b"ab"));
    }
}
