//! OwnershipScheduler Actor
//!
//! Decides, per inbound event, whether this node owns the work and hands
//! owned work to the isolated dispatcher.

use super::messages::{
    CheckOwnership, GetSchedulerStats, HandleEvent, MembershipChanged, OwnershipDecision,
    OwnershipError, SchedulerStats,
};
use super::snapshot::SnapshotTracker;
use crate::bus::{BusMessage, VerificationEvent};
use crate::dispatch::IsolatedDispatcher;
use crate::membership::{MembershipSource, NodeId};
use crate::observability::{events, metrics};
use jumpshard_core::{jump_hash, normalize, ResourceId};
use kameo::{
    message::{Context, Message},
    Actor,
};
use tracing::{error, trace};

/// Per-node actor routing keyed events by jump consistent hashing.
///
/// Every node runs one, with identical code. Coordination is implicit: each
/// node computes the same hash over the same (eventually consistent) view of
/// membership, so exactly one node claims a given key under a stable view.
#[derive(Actor)]
pub struct OwnershipScheduler<M: MembershipSource> {
    /// Bus topic carrying verification events
    topic: String,
    /// Cached cluster view
    tracker: SnapshotTracker<M>,
    /// Executor for owned work
    dispatcher: IsolatedDispatcher,
    /// Event counters
    stats: SchedulerStats,
}

impl<M: MembershipSource> OwnershipScheduler<M> {
    /// Create a new OwnershipScheduler subscribed to `topic`.
    ///
    /// The node identity comes from the tracker.
    pub fn new(
        topic: impl Into<String>,
        tracker: SnapshotTracker<M>,
        dispatcher: IsolatedDispatcher,
    ) -> Self {
        let stats = SchedulerStats {
            node_id: tracker.self_id().to_string(),
            ..SchedulerStats::default()
        };

        Self {
            topic: topic.into(),
            tracker,
            dispatcher,
            stats,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        self.tracker.self_id()
    }

    /// Extract a verification event, or None if the message is not one.
    fn recognize(&self, msg: &BusMessage) -> Option<VerificationEvent> {
        if msg.topic != self.topic {
            events::event_ignored(self.node_id().as_str(), &msg.topic, "topic mismatch");
            return None;
        }

        match serde_json::from_value::<VerificationEvent>(msg.payload.clone()) {
            Ok(event) => Some(event),
            Err(e) => {
                events::event_ignored(self.node_id().as_str(), &msg.topic, &e.to_string());
                None
            }
        }
    }

    /// Normalize, consult the snapshot, hash, and compare with the local index.
    async fn decide(&mut self, resource_id: ResourceId) -> Result<OwnershipDecision, OwnershipError> {
        let key = normalize(&resource_id);
        let snapshot = self.tracker.current_snapshot().await?;
        let bucket = jump_hash(key, snapshot.size())?;

        Ok(OwnershipDecision {
            owner: snapshot.member_at(bucket).cloned(),
            owned: bucket == snapshot.self_index(),
            resource_id,
            key,
            bucket,
            self_index: snapshot.self_index(),
            cluster_size: snapshot.size(),
        })
    }
}

impl<M: MembershipSource> Message<HandleEvent> for OwnershipScheduler<M> {
    type Reply = ();

    async fn handle(
        &mut self,
        HandleEvent(msg): HandleEvent,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.stats.events_seen += 1;

        let Some(event) = self.recognize(&msg) else {
            self.stats.ignored += 1;
            metrics::record_event("ignored");
            return;
        };

        match self.decide(event.resource_id).await {
            Ok(decision) if decision.owned => {
                events::ownership_claimed(
                    self.node_id().as_str(),
                    &decision.resource_id.to_string(),
                    decision.key,
                    decision.bucket,
                    decision.cluster_size,
                );
                self.stats.owned += 1;
                metrics::record_event("owned");

                // Dropping the handle detaches the work task
                drop(self.dispatcher.dispatch(decision.resource_id).await);
            }
            Ok(decision) => {
                // Owned elsewhere: the common case, not worth more than a trace
                trace!(
                    resource_id = %decision.resource_id,
                    bucket = decision.bucket,
                    self_index = decision.self_index,
                    metadata = ?event.metadata,
                    "Event owned by another node"
                );
                self.stats.discarded += 1;
                metrics::record_event("discarded");
            }
            Err(e) => {
                error!(
                    node_id = %self.node_id(),
                    topic = %msg.topic,
                    error = %e,
                    "Dropping event, ownership could not be computed"
                );
                self.stats.errors += 1;
                metrics::record_event("error");
            }
        }
    }
}

impl<M: MembershipSource> Message<CheckOwnership> for OwnershipScheduler<M> {
    type Reply = Result<OwnershipDecision, OwnershipError>;

    async fn handle(
        &mut self,
        msg: CheckOwnership,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.decide(msg.resource_id).await
    }
}

impl<M: MembershipSource> Message<MembershipChanged> for OwnershipScheduler<M> {
    type Reply = ();

    async fn handle(
        &mut self,
        _msg: MembershipChanged,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        events::membership_changed(self.node_id().as_str());
        self.tracker.invalidate();
    }
}

impl<M: MembershipSource> Message<GetSchedulerStats> for OwnershipScheduler<M> {
    type Reply = SchedulerStats;

    async fn handle(
        &mut self,
        _msg: GetSchedulerStats,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let snapshot = self.tracker.cached();

        SchedulerStats {
            cluster_size: snapshot.as_ref().map(|s| s.size()),
            self_index: snapshot.as_ref().map(|s| s.self_index()),
            dispatch: self.dispatcher.stats(),
            ..self.stats.clone()
        }
    }
}
