//! Structured Events
//!
//! Structured event logging with consistent fields across the node. Each
//! event type has a dedicated function so field names never drift.
//!
//! Event types:
//! - `snapshot_refreshed` - cluster snapshot recomputed
//! - `snapshot_stale` - membership query failed, previous snapshot kept
//! - `membership_changed` - snapshot invalidated by a pushed change
//! - `ownership_claimed` - this node owns an event and dispatched it
//! - `event_ignored` - bus message not recognized as a verification event
//! - `work_failed` - owned work returned an error
//! - `work_panicked` - owned work panicked inside its isolated task

use tracing::{debug, error, info, trace, warn};

/// Emit a snapshot refreshed event
pub fn snapshot_refreshed(node_id: &str, previous_size: Option<u32>, size: u32, self_index: u32) {
    if previous_size.is_some_and(|previous| previous != size) {
        info!(
            event_type = "snapshot_refreshed",
            node_id = %node_id,
            previous_size = ?previous_size,
            size = size,
            self_index = self_index,
            "Cluster size changed"
        );
    } else {
        debug!(
            event_type = "snapshot_refreshed",
            node_id = %node_id,
            size = size,
            self_index = self_index,
            "Cluster snapshot refreshed"
        );
    }
}

/// Emit a stale snapshot event
pub fn snapshot_stale(node_id: &str, error: &str, age_secs: f64) {
    warn!(
        event_type = "snapshot_stale",
        node_id = %node_id,
        error = %error,
        age_secs = age_secs,
        "Membership unavailable, keeping previous snapshot"
    );
}

/// Emit a membership changed event
pub fn membership_changed(node_id: &str) {
    info!(
        event_type = "membership_changed",
        node_id = %node_id,
        "Membership change signalled, snapshot invalidated"
    );
}

/// Emit an ownership claimed event
pub fn ownership_claimed(node_id: &str, resource_id: &str, key: u64, bucket: u32, size: u32) {
    debug!(
        event_type = "ownership_claimed",
        node_id = %node_id,
        resource_id = %resource_id,
        key = key,
        bucket = bucket,
        cluster_size = size,
        "Owned event dispatched"
    );
}

/// Emit an event ignored event
pub fn event_ignored(node_id: &str, topic: &str, reason: &str) {
    trace!(
        event_type = "event_ignored",
        node_id = %node_id,
        topic = %topic,
        reason = %reason,
        "Ignoring unrecognized event"
    );
}

/// Emit a work failed event
pub fn work_failed(resource_id: &str, error: &str) {
    warn!(
        event_type = "work_failed",
        resource_id = %resource_id,
        error = %error,
        "Dispatched work failed"
    );
}

/// Emit a work panicked event
pub fn work_panicked(resource_id: &str, error: &str) {
    error!(
        event_type = "work_panicked",
        resource_id = %resource_id,
        error = %error,
        "Dispatched work panicked"
    );
}
