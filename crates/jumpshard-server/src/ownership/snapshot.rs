//! Cluster Snapshot Tracker
//!
//! Caches an immutable, deterministically ordered view of cluster membership
//! and recomputes it lazily once it is older than the configured TTL.

use crate::membership::{MembershipError, MembershipSource, NodeId};
use crate::observability::{events, metrics};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;

/// Immutable capture of cluster membership as seen by one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSnapshot {
    /// Members sorted lexicographically, no duplicates, always including self
    members: Vec<NodeId>,
    /// Position of the local node in `members`
    self_index: u32,
    /// When the snapshot was computed (monotonic, drives the TTL)
    computed_at: Instant,
    /// When the snapshot was computed (wall clock, for reporting)
    computed_at_utc: DateTime<Utc>,
}

impl ClusterSnapshot {
    /// Build a snapshot from a raw membership list.
    ///
    /// The local node is added if the source omitted it, and the list is
    /// sorted and de-duplicated so every node derives the same ordering.
    pub fn compute(self_id: &NodeId, members: impl IntoIterator<Item = NodeId>) -> Self {
        let mut ordered: BTreeSet<NodeId> = members.into_iter().collect();
        ordered.insert(self_id.clone());

        let members: Vec<NodeId> = ordered.into_iter().collect();
        let self_index = members
            .iter()
            .position(|node| node == self_id)
            .unwrap_or_default() as u32;

        Self {
            members,
            self_index,
            computed_at: Instant::now(),
            computed_at_utc: Utc::now(),
        }
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn self_index(&self) -> u32 {
        self.self_index
    }

    /// Number of members; never zero.
    pub fn size(&self) -> u32 {
        self.members.len() as u32
    }

    pub fn computed_at(&self) -> Instant {
        self.computed_at
    }

    pub fn computed_at_utc(&self) -> DateTime<Utc> {
        self.computed_at_utc
    }

    pub fn age(&self) -> Duration {
        self.computed_at.elapsed()
    }

    /// Node at a bucket index, if in range.
    pub fn member_at(&self, index: u32) -> Option<&NodeId> {
        self.members.get(index as usize)
    }
}

/// Errors returned by [`SnapshotTracker::current_snapshot`].
#[derive(Debug, Clone, Error)]
pub enum SnapshotError {
    /// No snapshot has ever been computed and the source cannot be queried.
    #[error("cluster membership unavailable and no previous snapshot: {0}")]
    MembershipUnavailable(#[source] MembershipError),
}

/// How many query timeouts to wait after a failed refresh before retrying.
const RETRY_TIMEOUT_FACTOR: u32 = 5;

/// Lazily refreshed cache of the local cluster snapshot.
pub struct SnapshotTracker<M> {
    self_id: NodeId,
    source: M,
    ttl: Duration,
    query_timeout: Duration,
    /// Last snapshot computed; kept through invalidation and failed refreshes
    current: Option<Arc<ClusterSnapshot>>,
    /// Set by `invalidate`; forces a refresh regardless of age
    expired: bool,
    /// Most recent failed refresh, which suppresses queries until the retry interval passes
    last_failure: Option<(Instant, MembershipError)>,
}

impl<M: MembershipSource> SnapshotTracker<M> {
    pub fn new(self_id: NodeId, source: M, ttl: Duration, query_timeout: Duration) -> Self {
        Self {
            self_id,
            source,
            ttl,
            query_timeout,
            current: None,
            expired: false,
            last_failure: None,
        }
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Minimum time between membership queries after one has failed.
    pub fn retry_interval(&self) -> Duration {
        self.ttl.min(self.query_timeout * RETRY_TIMEOUT_FACTOR)
    }

    /// Last known snapshot, without triggering a refresh.
    pub fn cached(&self) -> Option<Arc<ClusterSnapshot>> {
        self.current.clone()
    }

    /// Mark the cached snapshot expired so the next query refreshes it.
    ///
    /// The snapshot itself is kept and still served if that refresh fails.
    pub fn invalidate(&mut self) {
        self.expired = true;
        self.last_failure = None;
    }

    fn is_fresh(&self, snapshot: &ClusterSnapshot) -> bool {
        !self.expired && snapshot.age() <= self.ttl
    }

    /// Return the current snapshot, recomputing it if missing or expired.
    ///
    /// A failed refresh falls back to the previous snapshot when one exists.
    /// After a failure the source is not queried again until
    /// [`retry_interval`](Self::retry_interval) has passed.
    pub async fn current_snapshot(&mut self) -> Result<Arc<ClusterSnapshot>, SnapshotError> {
        if let Some(snapshot) = &self.current {
            if self.is_fresh(snapshot) {
                return Ok(Arc::clone(snapshot));
            }
        }

        if let Some((failed_at, error)) = &self.last_failure {
            if failed_at.elapsed() < self.retry_interval() {
                trace!(
                    node_id = %self.self_id,
                    error = %error,
                    "Membership refresh backing off"
                );
                return match &self.current {
                    Some(stale) => Ok(Arc::clone(stale)),
                    None => Err(SnapshotError::MembershipUnavailable(error.clone())),
                };
            }
        }

        match self.query_members().await {
            Ok(members) => {
                let snapshot = Arc::new(ClusterSnapshot::compute(&self.self_id, members));
                let previous_size = self.current.as_ref().map(|s| s.size());

                events::snapshot_refreshed(
                    self.self_id.as_str(),
                    previous_size,
                    snapshot.size(),
                    snapshot.self_index(),
                );
                metrics::record_snapshot_refresh("fresh");
                metrics::set_cluster_size(snapshot.size());

                self.current = Some(Arc::clone(&snapshot));
                self.expired = false;
                self.last_failure = None;
                Ok(snapshot)
            }
            Err(e) => {
                self.last_failure = Some((Instant::now(), e.clone()));
                match &self.current {
                    Some(stale) => {
                        events::snapshot_stale(
                            self.self_id.as_str(),
                            &e.to_string(),
                            stale.age().as_secs_f64(),
                        );
                        metrics::record_snapshot_refresh("stale");
                        Ok(Arc::clone(stale))
                    }
                    None => {
                        metrics::record_snapshot_refresh("unavailable");
                        Err(SnapshotError::MembershipUnavailable(e))
                    }
                }
            }
        }
    }

    async fn query_members(&self) -> Result<Vec<NodeId>, MembershipError> {
        tokio::time::timeout(self.query_timeout, self.source.live_members())
            .await
            .map_err(|_| MembershipError::Timeout(self.query_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::{SharedMembership, StaticMembership};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(300);
    const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

    fn nodes(ids: &[&str]) -> Vec<NodeId> {
        ids.iter().map(|id| NodeId::from(*id)).collect()
    }

    /// Source that never answers.
    struct HangingMembership;

    /// Fixed members, counting queries, that can be switched to never answer.
    #[derive(Default)]
    struct StallingMembership {
        members: Vec<NodeId>,
        stalled: AtomicBool,
        queries: AtomicUsize,
    }

    impl StallingMembership {
        fn new(members: Vec<NodeId>) -> Arc<Self> {
            Arc::new(Self {
                members,
                ..Self::default()
            })
        }

        fn stall(&self, stalled: bool) {
            self.stalled.store(stalled, Ordering::SeqCst);
        }

        fn queries(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }
    }

    impl MembershipSource for StallingMembership {
        async fn live_members(&self) -> Result<Vec<NodeId>, MembershipError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.stalled.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Ok(self.members.clone())
        }
    }

    impl MembershipSource for HangingMembership {
        async fn live_members(&self) -> Result<Vec<NodeId>, MembershipError> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_compute_sorts_and_locates_self() {
        let snapshot = ClusterSnapshot::compute(&"B".into(), nodes(&["C", "A", "B"]));
        assert_eq!(snapshot.members(), nodes(&["A", "B", "C"]).as_slice());
        assert_eq!(snapshot.self_index(), 1);
        assert_eq!(snapshot.size(), 3);
        assert_eq!(snapshot.member_at(2), Some(&NodeId::from("C")));
    }

    #[test]
    fn test_compute_adds_missing_self() {
        let snapshot = ClusterSnapshot::compute(&"b".into(), nodes(&["c", "a"]));
        assert_eq!(snapshot.members(), nodes(&["a", "b", "c"]).as_slice());
        assert_eq!(snapshot.self_index(), 1);
    }

    #[test]
    fn test_compute_deduplicates() {
        let snapshot = ClusterSnapshot::compute(&"a".into(), nodes(&["a", "b", "b", "a"]));
        assert_eq!(snapshot.size(), 2);
    }

    #[test]
    fn test_compute_alone() {
        let snapshot = ClusterSnapshot::compute(&"solo".into(), Vec::new());
        assert_eq!(snapshot.size(), 1);
        assert_eq!(snapshot.self_index(), 0);
    }

    #[test]
    fn test_every_node_agrees_on_order() {
        let membership = nodes(&["node-2", "node-0", "node-1"]);
        let views: Vec<ClusterSnapshot> = membership
            .iter()
            .map(|me| ClusterSnapshot::compute(me, membership.iter().rev().cloned()))
            .collect();

        for view in &views {
            assert_eq!(view.members(), views[0].members());
        }
        let indices: BTreeSet<u32> = views.iter().map(|v| v.self_index()).collect();
        assert_eq!(indices, BTreeSet::from([0, 1, 2]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reused_within_ttl() {
        let source = StaticMembership::new(nodes(&["a", "b", "c"]));
        let mut tracker = SnapshotTracker::new("a".into(), source, TTL, QUERY_TIMEOUT);

        let first = tracker.current_snapshot().await.unwrap();
        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        let second = tracker.current_snapshot().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_recomputed_after_ttl() {
        let source = StaticMembership::new(nodes(&["a", "b", "c"]));
        let mut tracker = SnapshotTracker::new("a".into(), source, TTL, QUERY_TIMEOUT);

        let first = tracker.current_snapshot().await.unwrap();
        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        let second = tracker.current_snapshot().await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.computed_at() > first.computed_at());
        assert_eq!(first.members(), second.members());
    }

    #[tokio::test(start_paused = true)]
    async fn test_membership_change_picked_up_after_ttl() {
        let source = SharedMembership::new(nodes(&["a", "b"]));
        let mut tracker = SnapshotTracker::new("a".into(), source.clone(), TTL, QUERY_TIMEOUT);

        assert_eq!(tracker.current_snapshot().await.unwrap().size(), 2);

        source.join("c".into()).await;
        assert_eq!(tracker.current_snapshot().await.unwrap().size(), 2);

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        assert_eq!(tracker.current_snapshot().await.unwrap().size(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_refresh() {
        let source = SharedMembership::new(nodes(&["a", "b"]));
        let mut tracker = SnapshotTracker::new("a".into(), source.clone(), TTL, QUERY_TIMEOUT);

        let first = tracker.current_snapshot().await.unwrap();
        source.leave(&"b".into()).await;
        tracker.invalidate();
        assert!(Arc::ptr_eq(&tracker.cached().unwrap(), &first));

        assert_eq!(tracker.current_snapshot().await.unwrap().size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_snapshot_served_when_source_down() {
        let source = SharedMembership::new(nodes(&["a", "b", "c"]));
        let mut tracker = SnapshotTracker::new("a".into(), source.clone(), TTL, QUERY_TIMEOUT);

        let first = tracker.current_snapshot().await.unwrap();
        source.set_available(false);
        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        let second = tracker.current_snapshot().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // Recovers once the source is back and the retry interval has passed
        source.set_available(true);
        let backing_off = tracker.current_snapshot().await.unwrap();
        assert!(Arc::ptr_eq(&first, &backing_off));

        tokio::time::advance(tracker.retry_interval()).await;
        let third = tracker.current_snapshot().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_without_prior_snapshot() {
        let source = SharedMembership::new(nodes(&["a"]));
        source.set_available(false);
        let mut tracker = SnapshotTracker::new("a".into(), source, TTL, QUERY_TIMEOUT);

        let err = tracker.current_snapshot().await.unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::MembershipUnavailable(MembershipError::Unreachable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_timeout() {
        let mut tracker =
            SnapshotTracker::new("a".into(), HangingMembership, TTL, QUERY_TIMEOUT);

        let err = tracker.current_snapshot().await.unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::MembershipUnavailable(MembershipError::Timeout(t)) if t == QUERY_TIMEOUT
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidated_snapshot_served_when_source_down() {
        let source = SharedMembership::new(nodes(&["a", "b", "c"]));
        let mut tracker = SnapshotTracker::new("a".into(), source.clone(), TTL, QUERY_TIMEOUT);

        let first = tracker.current_snapshot().await.unwrap();
        tracker.invalidate();
        source.set_available(false);

        let second = tracker.current_snapshot().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // Still expired, so the next query after recovery refreshes
        tokio::time::advance(tracker.retry_interval()).await;
        source.set_available(true);
        let third = tracker.current_snapshot().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_backs_off() {
        let source = StallingMembership::new(nodes(&["a", "b", "c"]));
        let mut tracker = SnapshotTracker::new("a".into(), source.clone(), TTL, QUERY_TIMEOUT);
        assert_eq!(tracker.retry_interval(), QUERY_TIMEOUT * RETRY_TIMEOUT_FACTOR);

        let first = tracker.current_snapshot().await.unwrap();
        source.stall(true);
        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        // Only the first lookup during the outage waits for the timeout
        let started = Instant::now();
        for _ in 0..5 {
            let snapshot = tracker.current_snapshot().await.unwrap();
            assert!(Arc::ptr_eq(&first, &snapshot));
        }
        assert!(started.elapsed() >= QUERY_TIMEOUT);
        assert!(started.elapsed() < QUERY_TIMEOUT * 2);
        assert_eq!(source.queries(), 2);

        // Retried once the interval passes
        tokio::time::advance(tracker.retry_interval()).await;
        tracker.current_snapshot().await.unwrap();
        assert_eq!(source.queries(), 3);

        source.stall(false);
        tokio::time::advance(tracker.retry_interval()).await;
        let refreshed = tracker.current_snapshot().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &refreshed));
        assert_eq!(source.queries(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_skips_backoff() {
        let source = StallingMembership::new(nodes(&["a", "b"]));
        let mut tracker = SnapshotTracker::new("a".into(), source.clone(), TTL, QUERY_TIMEOUT);

        tracker.current_snapshot().await.unwrap();
        source.stall(true);
        tracker.invalidate();
        tracker.current_snapshot().await.unwrap();
        assert_eq!(source.queries(), 2);

        source.stall(false);
        tracker.invalidate();
        tracker.current_snapshot().await.unwrap();
        assert_eq!(source.queries(), 3);
    }
}
