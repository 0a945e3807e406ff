//! Core shared types and hashing for jumpshard
//!
//! This crate contains the pure, runtime-free pieces used by every node:
//! - `key`: maps resource identifiers into the `u64` hash domain
//! - `jump`: jump consistent hashing of a key onto `n` buckets
//!
//! Everything here is deterministic across processes and machines, so two
//! nodes handed the same key and cluster size always agree on the bucket.

mod error;
mod jump;
mod key;

pub use error::HashError;
pub use jump::{jump_hash, MAX_BUCKETS};
pub use key::{normalize, ResourceId};
