//! SSE Event Bus (C6) — per-Story event stream, adapted from a broadcast
//! pub/sub pattern. Best-effort delivery: a slow consumer is dropped rather
//! than back-pressuring the scheduler (§9 design note); a dropped event is
//! never replayed (§4.6) — a full state fetch is the compensating action.

use super::types::StoryEvent;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("channel closed")]
    ChannelClosed,
}

pub type EventBusResult<T> = Result<T, EventBusError>;
pub type SharedEventBus = Arc<EventBus>;

/// One broadcast channel per Story, so that a slow subscriber on Story A
/// cannot starve subscribers on Story B, and so that a finished Story's
/// channel can be dropped instead of accumulating forever.
pub struct EventBus {
    channels: RwLock<HashMap<String, broadcast::Sender<StoryEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    fn sender_for(&self, story_id: &str) -> broadcast::Sender<StoryEvent> {
        if let Some(tx) = self.channels.read().expect("event bus lock poisoned").get(story_id) {
            return tx.clone();
        }
        let mut guard = self.channels.write().expect("event bus lock poisoned");
        guard
            .entry(story_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish an event, scoped by its own `story_id()`. Best-effort: no
    /// receivers is not an error.
    pub fn publish(&self, event: StoryEvent) -> EventBusResult<()> {
        let tx = self.sender_for(event.story_id());
        let event_type = event.event_type();
        match tx.send(event) {
            Ok(n) => {
                tracing::debug!(event_type, receivers = n, "event published");
            }
            Err(_) => {
                tracing::debug!(event_type, "event published with no receivers");
            }
        }
        Ok(())
    }

    pub fn subscribe(&self, story_id: &str) -> broadcast::Receiver<StoryEvent> {
        self.sender_for(story_id).subscribe()
    }

    pub fn subscriber_count(&self, story_id: &str) -> usize {
        self.channels
            .read()
            .expect("event bus lock poisoned")
            .get(story_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drop a Story's channel once it has reached a terminal state and all
    /// subscribers have disconnected, so the map doesn't grow unbounded.
    pub fn retire(&self, story_id: &str) {
        let mut guard = self.channels.write().expect("event bus lock poisoned");
        if let Some(tx) = guard.get(story_id) {
            if tx.receiver_count() == 0 {
                guard.remove(story_id);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn publish_subscribe_roundtrip() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("story-1");
        bus.publish(StoryEvent::StoryCreated {
            story_id: "story-1".into(),
            timestamp: Utc::now(),
        })
        .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "story-created");
    }

    #[tokio::test]
    async fn stories_do_not_share_a_channel() {
        let bus = EventBus::new().shared();
        let mut rx_a = bus.subscribe("a");
        let _rx_b = bus.subscribe("b");

        bus.publish(StoryEvent::Done {
            story_id: "a".into(),
            timestamp: Utc::now(),
        })
        .unwrap();

        let event = rx_a.recv().await.unwrap();
        assert_eq!(event.story_id(), "a");
        assert_eq!(bus.subscriber_count("b"), 1);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_error() {
        let bus = EventBus::new();
        let result = bus.publish(StoryEvent::Done {
            story_id: "lonely".into(),
            timestamp: Utc::now(),
        });
        assert!(result.is_ok());
    }
}
