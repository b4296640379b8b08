//! CBOR wire codec for frames.
//!
//! Byte-oriented transports carry frames as CBOR; in-process transports
//! hand the typed values over directly and never touch this module.

use super::{Frame, ProtocolError};

/// Encode a frame to CBOR bytes.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    serde_cbor::to_vec(frame).map_err(ProtocolError::Encode)
}

/// Decode a frame from CBOR bytes.
pub fn decode(bytes: &[u8]) -> Result<Frame, ProtocolError> {
    if bytes.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    serde_cbor::from_slice(bytes).map_err(ProtocolError::Decode)
}
