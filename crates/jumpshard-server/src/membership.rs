//! Cluster Membership Sources
//!
//! The scheduler never discovers peers itself. It asks a [`MembershipSource`]
//! for the current set of live node identifiers and builds its snapshot from
//! whatever comes back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Identifier of a cluster node.
///
/// Ordered lexicographically so every node sorts the same membership set
/// into the same sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Errors returned by a membership query.
#[derive(Debug, Clone, Error)]
pub enum MembershipError {
    #[error("membership source unreachable: {0}")]
    Unreachable(String),
    #[error("membership query timed out after {0:?}")]
    Timeout(Duration),
}

/// Source of the current set of live node identifiers.
///
/// Implementations may be eventually consistent and may or may not include
/// the caller; the snapshot tracker adds the local node either way.
pub trait MembershipSource: Send + Sync + 'static {
    fn live_members(&self) -> impl Future<Output = Result<Vec<NodeId>, MembershipError>> + Send;
}

impl<M: MembershipSource> MembershipSource for Arc<M> {
    fn live_members(&self) -> impl Future<Output = Result<Vec<NodeId>, MembershipError>> + Send {
        (**self).live_members()
    }
}

/// Fixed membership list, e.g. from `CLUSTER_MEMBERS`.
#[derive(Debug, Clone, Default)]
pub struct StaticMembership {
    members: Vec<NodeId>,
}

impl StaticMembership {
    pub fn new(members: Vec<NodeId>) -> Self {
        Self { members }
    }
}

impl MembershipSource for StaticMembership {
    async fn live_members(&self) -> Result<Vec<NodeId>, MembershipError> {
        Ok(self.members.clone())
    }
}

/// Mutable membership set shared between nodes in one process.
///
/// Cloning yields a handle onto the same set. `set_available(false)` makes
/// every query fail, which stands in for an unreachable discovery backend.
#[derive(Debug, Clone)]
pub struct SharedMembership {
    members: Arc<RwLock<BTreeSet<NodeId>>>,
    available: Arc<AtomicBool>,
}

impl SharedMembership {
    pub fn new(members: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            members: Arc::new(RwLock::new(members.into_iter().collect())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Add a node. Returns false if it was already a member.
    pub async fn join(&self, node: NodeId) -> bool {
        debug!(node_id = %node, "Node joined shared membership");
        self.members.write().await.insert(node)
    }

    /// Remove a node. Returns false if it was not a member.
    pub async fn leave(&self, node: &NodeId) -> bool {
        debug!(node_id = %node, "Node left shared membership");
        self.members.write().await.remove(node)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }
}

impl MembershipSource for SharedMembership {
    async fn live_members(&self) -> Result<Vec<NodeId>, MembershipError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(MembershipError::Unreachable(
                "shared membership marked unavailable".to_string(),
            ));
        }
        Ok(self.members.read().await.iter().cloned().collect())
    }
}
