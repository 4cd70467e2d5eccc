//! In-process publish/subscribe bus.
//!
//! One broadcast channel per topic. Messages published by a single
//! publisher arrive at every subscriber in publish order.
//!
//! Delivery is at-least-once only while every subscriber stays within the
//! channel capacity. A subscriber that falls further behind observes a lag
//! error carrying the number of dropped messages and skips ahead, so the
//! capacity must cover the largest burst a subscriber can trail by.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::event::FileMutationEvent;
use crate::progress::ProgressEvent;

/// Topic carrying mutations observed on the content repository.
pub const REPOSITORY_TOPIC: &str = "kbsync.repository";

/// Topic carrying index-side mutations and lifecycle progress.
pub const INDEX_TOPIC: &str = "kbsync.index";

/// Default per-topic channel capacity.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Every message that travels over the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BusMessage {
    FileMutation(FileMutationEvent),
    Progress(ProgressEvent),
}

/// Topic-addressed broadcast bus shared by all components.
pub struct EventBus {
    capacity: usize,
    topics: DashMap<String, broadcast::Sender<BusMessage>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: DashMap::new(),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish a message. Messages with no subscriber are dropped.
    pub fn publish(&self, topic: &str, message: BusMessage) {
        let sender = self.sender(topic);
        let receivers = sender.send(message).unwrap_or(0);
        debug!(topic, receivers, "Published bus message");
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        self.sender(topic).subscribe()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Identity;

    #[tokio::test]
    async fn test_publish_reaches_subscriber_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe(REPOSITORY_TOPIC);
        let identity = Identity::new("u1", "o1");

        for name in ["a.pdf", "b.pdf", "c.pdf"] {
            bus.publish(
                REPOSITORY_TOPIC,
                BusMessage::FileMutation(FileMutationEvent::created(name, &identity)),
            );
        }

        for expected in ["a.pdf", "b.pdf", "c.pdf"] {
            match rx.recv().await.unwrap() {
                BusMessage::FileMutation(event) => {
                    assert_eq!(event.path.unwrap().to_str(), Some(expected))
                }
                other => panic!("unexpected message {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = EventBus::default();
        let mut index_rx = bus.subscribe(INDEX_TOPIC);
        let identity = Identity::new("u1", "o1");
        bus.publish(
            REPOSITORY_TOPIC,
            BusMessage::FileMutation(FileMutationEvent::deleted("a.pdf", &identity)),
        );
        assert!(index_rx.try_recv().is_err());
        assert_eq!(bus.subscriber_count(INDEX_TOPIC), 1);
        assert_eq!(bus.subscriber_count(REPOSITORY_TOPIC), 0);
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::new(4);
        let identity = Identity::new("u1", "o1");
        bus.publish(
            INDEX_TOPIC,
            BusMessage::FileMutation(FileMutationEvent::created("a.pdf", &identity)),
        );
        assert_eq!(bus.subscriber_count(INDEX_TOPIC), 0);
    }

    #[test]
    fn test_message_tagging() {
        let identity = Identity::new("u1", "o1");
        let message = BusMessage::FileMutation(FileMutationEvent::created("a.pdf", &identity));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "file_mutation");
        assert_eq!(json["payload"]["kind"], "created");
    }
}
