//! Jumpshard Server Library
//!
//! Ownerless work partitioning for a cluster of identical nodes: each node
//! decides locally which keyed events it owns and runs only that work.

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod membership;
pub mod node;
pub mod observability;
pub mod ownership;
