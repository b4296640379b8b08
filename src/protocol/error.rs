//! Protocol error types.

use thiserror::Error;

/// Errors related to frame encoding and decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame encode failed: {0}")]
    Encode(#[source] serde_cbor::Error),

    #[error("frame decode failed: {0}")]
    Decode(#[source] serde_cbor::Error),

    #[error("empty frame")]
    EmptyFrame,
}
