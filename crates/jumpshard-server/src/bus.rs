//! In-Process Broadcast Bus
//!
//! Topic-tagged publish/subscribe over `tokio::sync::broadcast`. Every node
//! subscribes and receives every message; ownership decides which single node
//! acts on it.
//!
//! ```text
//! publisher ──► EventBus ──► subscription (one per node) ──tell──► OwnershipScheduler
//! ```

use crate::membership::MembershipSource;
use crate::observability::metrics;
use crate::ownership::{HandleEvent, OwnershipScheduler};
use jumpshard_core::ResourceId;
use kameo::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Message carried on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    /// Build a message carrying a [`VerificationEvent`].
    pub fn verification(topic: impl Into<String>, event: &VerificationEvent) -> Self {
        // Serializing a struct of strings and integers cannot fail
        let payload = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
        Self::new(topic, payload)
    }
}

/// Payload shape the scheduler acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationEvent {
    /// Resource to verify
    pub resource_id: ResourceId,
    /// Free-form event metadata, passed through to logs
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl VerificationEvent {
    pub fn new(resource_id: impl Into<ResourceId>) -> Self {
        Self {
            resource_id: resource_id.into(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Broadcast bus shared by all local subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusMessage>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a message. Returns the number of subscribers that received it.
    pub fn publish(&self, message: BusMessage) -> usize {
        match self.sender.send(message) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("Published with no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Forward every bus message to a scheduler, in arrival order.
///
/// Runs until the bus closes or the scheduler stops.
pub fn spawn_subscription<M: MembershipSource>(
    mut receiver: broadcast::Receiver<BusMessage>,
    scheduler: ActorRef<OwnershipScheduler<M>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    if let Err(e) = scheduler.tell(HandleEvent(message)).await {
                        error!(error = %e, "Scheduler unreachable, ending subscription");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Bus subscriber lagged, events dropped");
                    metrics::record_bus_lagged(skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Bus closed, ending subscription");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_verification_event_parsing() {
        let event: VerificationEvent =
            serde_json::from_value(json!({ "resource_id": "example.com" })).unwrap();
        assert_eq!(event, VerificationEvent::new("example.com"));

        let event: VerificationEvent = serde_json::from_value(json!({
            "resource_id": 12,
            "metadata": { "source": "cron" }
        }))
        .unwrap();
        assert_eq!(event.resource_id, ResourceId::Int(12));
        assert_eq!(event.metadata.get("source").map(String::as_str), Some("cron"));

        assert!(serde_json::from_value::<VerificationEvent>(json!({ "id": 1 })).is_err());
    }

    #[test]
    fn test_verification_message_round_trip() {
        let event = VerificationEvent::new(99u64);
        let message = BusMessage::verification("verification", &event);
        assert_eq!(message.topic, "verification");
        let parsed: VerificationEvent = serde_json::from_value(message.payload).unwrap();
        assert_eq!(parsed, event);
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let message = BusMessage::new("verification", json!({ "resource_id": 1 }));
        assert_eq!(bus.publish(message.clone()), 2);

        assert_eq!(a.recv().await.unwrap(), message);
        assert_eq!(b.recv().await.unwrap(), message);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(BusMessage::new("t", json!(null))), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
