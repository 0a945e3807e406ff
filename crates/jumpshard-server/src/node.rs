//! Node Initialization
//!
//! Wires one node together: snapshot tracker, isolated dispatcher, ownership
//! scheduler, and the bus subscription that feeds it.

use crate::bus::{spawn_subscription, EventBus};
use crate::config::SchedulerConfig;
use crate::dispatch::{IsolatedDispatcher, Work};
use crate::membership::{MembershipSource, NodeId};
use crate::ownership::{GetSchedulerStats, MembershipChanged, OwnershipScheduler, SchedulerStats, SnapshotTracker};
use kameo::prelude::*;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Handle to a running node.
pub struct NodeHandle<M: MembershipSource> {
    pub node_id: NodeId,
    pub scheduler: ActorRef<OwnershipScheduler<M>>,
    pub subscription: JoinHandle<()>,
}

impl<M: MembershipSource> NodeHandle<M> {
    /// Fetch the scheduler's counters.
    pub async fn stats(&self) -> anyhow::Result<SchedulerStats> {
        Ok(self.scheduler.ask(GetSchedulerStats).await?)
    }

    /// Tell the scheduler membership changed so its next event refreshes.
    pub async fn membership_changed(&self) -> anyhow::Result<()> {
        self.scheduler.tell(MembershipChanged).await?;
        Ok(())
    }

    /// Wait until the scheduler has seen `expected_events` and all owned work
    /// has finished, polling every `POLL_INTERVAL`.
    ///
    /// Events dropped by a lagging subscription are never seen, so the wait is
    /// bounded by `limit`; on expiry the latest counters are returned with a warning.
    pub async fn drain(
        &self,
        expected_events: u64,
        limit: Duration,
    ) -> anyhow::Result<SchedulerStats> {
        let poll = async {
            loop {
                let stats = self.stats().await?;
                if stats.events_seen >= expected_events && stats.dispatch.is_idle() {
                    return anyhow::Ok(stats);
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };

        match tokio::time::timeout(limit, poll).await {
            Ok(stats) => stats,
            Err(_) => {
                let stats = self.stats().await?;
                warn!(
                    node_id = %self.node_id,
                    expected = expected_events,
                    seen = stats.events_seen,
                    dispatch = ?stats.dispatch,
                    "Drain timed out"
                );
                Ok(stats)
            }
        }
    }

    /// Stop the subscription and the scheduler.
    pub async fn shutdown(self) {
        self.subscription.abort();
        self.scheduler.stop_gracefully().await.ok();
        info!(node_id = %self.node_id, "Node stopped");
    }
}

/// Start a node subscribed to `bus`.
///
/// Must be called from within a Tokio runtime.
pub fn start_node<M: MembershipSource>(
    config: &SchedulerConfig,
    source: M,
    work: Work,
    bus: &EventBus,
) -> NodeHandle<M> {
    let tracker = SnapshotTracker::new(
        config.node_id.clone(),
        source,
        config.bucket_refresh_ttl,
        config.membership_timeout,
    );
    let dispatcher = IsolatedDispatcher::new(
        work,
        config.dispatch_isolation,
        config.max_concurrent_dispatches,
    );

    let scheduler = OwnershipScheduler::spawn(OwnershipScheduler::new(
        config.topic.clone(),
        tracker,
        dispatcher,
    ));
    let subscription = spawn_subscription(bus.subscribe(), scheduler.clone());

    info!(
        node_id = %config.node_id,
        topic = %config.topic,
        ttl_secs = config.bucket_refresh_ttl.as_secs(),
        isolation = %config.dispatch_isolation,
        "Started ownership scheduler"
    );

    NodeHandle {
        node_id: config.node_id.clone(),
        scheduler,
        subscription,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusMessage, VerificationEvent};
    use crate::dispatch::work_fn;
    use crate::membership::{SharedMembership, StaticMembership};
    use jumpshard_core::ResourceId;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn config_for(node_id: &str) -> SchedulerConfig {
        SchedulerConfig {
            node_id: node_id.into(),
            ..SchedulerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_cluster_processes_each_event_once() {
        let ids = ["node-a", "node-b", "node-c"];
        let membership = SharedMembership::new(ids.iter().map(|id| NodeId::from(*id)));
        let bus = EventBus::new(256);
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, ResourceId)>();

        let nodes: Vec<_> = ids
            .iter()
            .map(|id| {
                let tx = tx.clone();
                let me = id.to_string();
                let work = work_fn(move |resource| {
                    let tx = tx.clone();
                    let me = me.clone();
                    async move {
                        tx.send((me, resource)).ok();
                        anyhow::Ok(())
                    }
                });
                start_node(&config_for(id), membership.clone(), work, &bus)
            })
            .collect();
        drop(tx);

        let total = 90u64;
        for i in 0..total {
            let event = VerificationEvent::new(format!("resource-{i}"));
            bus.publish(BusMessage::verification("verification", &event));
        }

        let mut seen: HashMap<ResourceId, String> = HashMap::new();
        for _ in 0..total {
            let (node, resource) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(seen.insert(resource, node).is_none(), "event processed twice");
        }
        assert_eq!(seen.len() as u64, total);

        let mut owned_total = 0;
        for node in &nodes {
            // Owned events are done; non-owned ones may still be in the mailbox
            let stats = node.drain(total, Duration::from_secs(5)).await.unwrap();
            assert_eq!(stats.events_seen, total);
            assert!(stats.dispatch.is_idle());
            assert_eq!(stats.owned + stats.discarded, total);
            owned_total += stats.owned;
        }
        assert_eq!(owned_total, total);

        for node in nodes {
            node.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_drain_gives_up_on_missing_events() {
        let bus = EventBus::new(16);
        let work = work_fn(|_| async { anyhow::Ok(()) });
        let node = start_node(
            &config_for("solo"),
            StaticMembership::new(Vec::new()),
            work,
            &bus,
        );

        bus.publish(BusMessage::verification(
            "verification",
            &VerificationEvent::new(1u64),
        ));

        // Two events were expected but only one was ever published
        let stats = tokio::time::timeout(
            Duration::from_secs(5),
            node.drain(2, Duration::from_millis(200)),
        )
        .await
        .expect("drain must respect its limit")
        .unwrap();
        assert_eq!(stats.events_seen, 1);
        assert!(stats.dispatch.is_idle());

        node.shutdown().await;
    }
}
