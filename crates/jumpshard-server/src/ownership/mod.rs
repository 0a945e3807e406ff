//! Ownership Scheduling Module
//!
//! Decides, without central coordination, which single node processes a
//! keyed event. Jump consistent hashing maps the event key onto the sorted
//! cluster membership; the node whose index matches dispatches the work.
//!
//! ## Architecture
//!
//! ```text
//! broadcast bus (every node receives every event)
//!        ↓
//! OwnershipScheduler (one per node, sequential mailbox)
//!        ↓
//! SnapshotTracker.current_snapshot()   ← MembershipSource (only if TTL expired)
//!        ↓
//! jump_hash(normalize(resource_id), snapshot.size())
//!        ↓
//!    ┌───┴────────────┐
//!    ↓                ↓
//! bucket == self    bucket != self
//!    ↓                ↓
//! IsolatedDispatcher  discard
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let decision = scheduler_ref
//!     .ask(CheckOwnership { resource_id: "example.com".into() })
//!     .await?;
//! if decision.owned {
//!     // This node is responsible for the resource
//! }
//! ```

mod actor;
mod messages;
mod snapshot;

pub use actor::OwnershipScheduler;
pub use messages::{
    CheckOwnership, GetSchedulerStats, HandleEvent, MembershipChanged, OwnershipDecision,
    OwnershipError, SchedulerStats,
};
pub use snapshot::{ClusterSnapshot, SnapshotError, SnapshotTracker};
