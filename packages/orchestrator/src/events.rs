//! Per-task event channels.
//!
//! One broadcast channel per task id, created lazily. Publishing is
//! fire-and-forget: with no subscriber the event is dropped, never an
//! error. Within one task, events are published in pipeline order; across
//! tasks there is no global ordering.

use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

use steward_types::Event;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
pub struct EventBus {
    channels: RwLock<HashMap<String, broadcast::Sender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a task's channel, creating it if needed.
    pub async fn subscribe(&self, task_id: &str) -> broadcast::Receiver<Event> {
        let mut channels = self.channels.write().await;
        channels
            .entry(task_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event on a task's channel. Fire-and-forget.
    pub async fn publish(&self, task_id: &str, event: Event) {
        let sender = {
            let mut channels = self.channels.write().await;
            channels
                .entry(task_id.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .clone()
        };
        // A send error only means nobody is listening.
        let _ = sender.send(event);
    }

    /// Drop a task's channel once its lifecycle is over.
    pub async fn remove(&self, task_id: &str) {
        self.channels.write().await.remove(task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("t1").await;

        bus.publish("t1", Event::status("one")).await;
        bus.publish("t1", Event::status("two")).await;
        bus.publish(
            "t1",
            Event::Done {
                cost: 0.1,
                tokens: 10,
            },
        )
        .await;

        assert_eq!(rx.recv().await.unwrap(), Event::status("one"));
        assert_eq!(rx.recv().await.unwrap(), Event::status("two"));
        assert!(rx.recv().await.unwrap().is_terminal());
    }

    #[tokio::test]
    async fn publish_without_subscriber_is_silent() {
        let bus = EventBus::new();
        bus.publish("ghost", Event::status("nobody listens")).await;
    }

    #[tokio::test]
    async fn channels_are_isolated_per_task() {
        let bus = EventBus::new();
        let mut rx_a = bus.subscribe("a").await;
        let mut rx_b = bus.subscribe("b").await;

        bus.publish("a", Event::status("for a")).await;
        bus.publish("b", Event::status("for b")).await;

        assert_eq!(rx_a.recv().await.unwrap(), Event::status("for a"));
        assert_eq!(rx_b.recv().await.unwrap(), Event::status("for b"));
    }
}
