//! Node identity.
//!
//! Every participant in the mesh owns exactly one [`NodeId`] for its
//! lifetime. The id is an opaque byte string: equality and hashing are
//! by value over the whole string, and the textual form exists only for
//! logs. Transports and auth providers decide what the bytes mean.

use rand::RngCore;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Opaque immutable node identifier.
///
/// The empty id ([`NodeId::none`]) is the distinguished "unknown" value;
/// it is never a valid identity on the wire.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(Arc<[u8]>);

impl NodeId {
    /// Create a NodeId from raw bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::from(bytes.into().into_boxed_slice()))
    }

    /// The distinguished "unknown" id.
    pub fn none() -> Self {
        Self(Arc::from(Vec::new().into_boxed_slice()))
    }

    /// Generate a random 16-byte id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_bytes(bytes.to_vec())
    }

    /// Check whether this is the "unknown" id.
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    /// Return the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(f, "NodeId(none)");
        }
        let head = &self.0[..self.0.len().min(8)];
        write!(f, "NodeId({})", hex_encode(head))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(f, "none");
        }
        write!(f, "{}", hex_encode(&self.0))
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// Serialized as a CBOR byte string, not a sequence of integers.
impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NodeIdVisitor;

        impl<'de> Visitor<'de> for NodeIdVisitor {
            type Value = NodeId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte string")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<NodeId, E> {
                Ok(NodeId::from_bytes(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<NodeId, E> {
                Ok(NodeId::from_bytes(v))
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<NodeId, A::Error> {
                let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(b) = seq.next_element::<u8>()? {
                    bytes.push(b);
                }
                Ok(NodeId::from_bytes(bytes))
            }
        }

        deserializer.deserialize_bytes(NodeIdVisitor)
    }
}

/// Lowercase hex encoding for log output.
pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    use fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
