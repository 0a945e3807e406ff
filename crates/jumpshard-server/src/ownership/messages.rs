//! OwnershipScheduler Message Types
//!
//! Messages for routing bus events and querying ownership state.

use super::snapshot::SnapshotError;
use crate::bus::BusMessage;
use crate::dispatch::DispatchStats;
use crate::membership::NodeId;
use jumpshard_core::{HashError, ResourceId};
use kameo::Reply;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inbound bus message to route.
///
/// Sent with `tell`; the scheduler dispatches it if owned and drops it otherwise.
#[derive(Debug, Clone)]
pub struct HandleEvent(pub BusMessage);

/// Compute ownership of a resource without dispatching anything.
#[derive(Debug, Clone)]
pub struct CheckOwnership {
    pub resource_id: ResourceId,
}

/// Outcome of an ownership computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Reply)]
pub struct OwnershipDecision {
    /// Resource the decision is about
    pub resource_id: ResourceId,
    /// Normalized hash key
    pub key: u64,
    /// Bucket assigned by jump hashing
    pub bucket: u32,
    /// Local node's index in the snapshot
    pub self_index: u32,
    /// Cluster size the bucket was computed against
    pub cluster_size: u32,
    /// Node sitting at `bucket` in the local view
    pub owner: Option<NodeId>,
    /// Whether the local node owns the resource
    pub owned: bool,
}

/// Reasons an ownership computation could not be completed.
#[derive(Debug, Clone, Error)]
pub enum OwnershipError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Hash(#[from] HashError),
}

/// Membership changed out-of-band; drop the cached snapshot.
#[derive(Debug, Clone, Copy)]
pub struct MembershipChanged;

/// Request the scheduler's counters.
#[derive(Debug, Clone, Copy)]
pub struct GetSchedulerStats;

/// Scheduler counters response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Reply)]
pub struct SchedulerStats {
    /// Local node ID
    pub node_id: String,
    /// Bus messages received
    pub events_seen: u64,
    /// Events owned by this node and dispatched
    pub owned: u64,
    /// Events owned by another node
    pub discarded: u64,
    /// Messages on another topic or with an unrecognized payload
    pub ignored: u64,
    /// Events dropped because ownership could not be computed
    pub errors: u64,
    /// Cluster size in the cached snapshot, if any
    pub cluster_size: Option<u32>,
    /// Local index in the cached snapshot, if any
    pub self_index: Option<u32>,
    /// Dispatcher counters
    pub dispatch: DispatchStats,
}
