//! Event bus for event streams, state machines, and host-driven triggers.
//!
//! Topics are created on demand over tokio broadcast channels. Closing a
//! topic drops its sender, which lets subscribed `EventStream` and
//! `StateMachine` nodes drain their backlog and complete.

use crate::types::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

const TOPIC_CAPACITY: usize = 64;

/// Named broadcast topics carrying JSON event values.
#[derive(Clone, Default)]
pub struct EventBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<Value>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a value to a topic, creating the topic if needed.
    ///
    /// Returns the number of current subscribers.
    pub fn publish(&self, topic: &str, value: Value) -> usize {
        let mut topics = self.topics.lock();
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        let delivered = sender.send(value).unwrap_or(0);
        trace!(topic, delivered, "event published");
        delivered
    }

    /// Subscribe to a topic, creating it if needed.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Value> {
        let mut topics = self.topics.lock();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Close a topic. Subscribers drain buffered events, then observe end of
    /// stream. Returns false if the topic never existed.
    pub fn close(&self, topic: &str) -> bool {
        self.topics.lock().remove(topic).is_some()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.topics.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe("orders");
        let mut b = bus.subscribe("orders");

        assert_eq!(bus.publish("orders", json!(1)), 2);
        assert_eq!(a.recv().await.unwrap(), json!(1));
        assert_eq!(b.recv().await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn close_ends_the_stream_after_backlog() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("orders");
        bus.publish("orders", json!("last"));
        assert!(bus.close("orders"));

        assert_eq!(rx.recv().await.unwrap(), json!("last"));
        assert!(rx.recv().await.is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_harmless() {
        let bus = EventBus::new();
        assert_eq!(bus.publish("nobody", json!(0)), 0);
    }

    #[tokio::test]
    async fn topics_are_independent() {
        let bus = EventBus::new();
        let mut orders = bus.subscribe("orders");
        let _payments = bus.subscribe("payments");

        bus.publish("payments", json!("p"));
        bus.publish("orders", json!("o"));
        assert_eq!(orders.recv().await.unwrap(), json!("o"));
    }
}
