//! Key Normalization
//!
//! Maps resource identifiers into the `u64` domain consumed by
//! [`jump_hash`](crate::jump_hash).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the resource an event refers to.
///
/// Deserializes untagged, so a JSON payload may carry either `42` or
/// `"example.com"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
    Int(u64),
    Text(String),
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Int(id) => write!(f, "{id}"),
            ResourceId::Text(id) => f.write_str(id),
        }
    }
}

impl From<u64> for ResourceId {
    fn from(id: u64) -> Self {
        ResourceId::Int(id)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        ResourceId::Text(id.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        ResourceId::Text(id)
    }
}

/// Normalize a resource identifier to a hash key.
///
/// Integers pass through unchanged. Text is hashed with BLAKE3 and the first
/// eight digest bytes are read little-endian. BLAKE3 is unseeded, so every
/// node and every process restart computes the same key for the same text.
pub fn normalize(id: &ResourceId) -> u64 {
    match id {
        ResourceId::Int(value) => *value,
        ResourceId::Text(text) => {
            let digest = blake3::hash(text.as_bytes());
            let mut prefix = [0u8; 8];
            prefix.copy_from_slice(&digest.as_bytes()[..8]);
            u64::from_le_bytes(prefix)
        }
    }
}
