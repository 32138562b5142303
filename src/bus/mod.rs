//! Event bus boundary: per-match pub/sub channels

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::ws::protocol::{MatchEvent, ServerMsg};

/// Default per-channel buffer before slow subscribers start lagging
pub const CHANNEL_CAPACITY: usize = 256;

/// Channel name for a match
pub fn match_channel(match_id: Uuid) -> String {
    format!("match:{}", match_id)
}

/// Event bus consumed by the orchestrator. Delivery is ordered per channel
/// and at-least-once; subscribers must tolerate duplicates.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, channel: &str, event: &MatchEvent) -> Result<(), BusError>;

    /// Release a channel once nothing more will be published on it
    fn close_channel(&self, _channel: &str) {}
}

/// Bus errors
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An event as delivered to subscribers, with its JSON frame encoded once
#[derive(Debug, Clone)]
pub struct Envelope {
    pub channel: Arc<str>,
    pub event: MatchEvent,
    /// `ServerMsg::Event` frame, shared by every subscriber
    pub frame: Arc<str>,
}

/// In-process bus over tokio broadcast channels
pub struct BroadcastBus {
    channels: DashMap<String, broadcast::Sender<Envelope>>,
    capacity: usize,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to a channel, creating it if needed
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Envelope> {
        self.sender(channel).subscribe()
    }

    /// Number of open channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Envelope> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .value()
            .clone()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for BroadcastBus {
    async fn publish(&self, channel: &str, event: &MatchEvent) -> Result<(), BusError> {
        let frame = serde_json::to_string(&ServerMsg::Event {
            event: event.clone(),
        })?;
        let envelope = Envelope {
            channel: Arc::from(channel),
            event: event.clone(),
            frame: Arc::from(frame),
        };

        // No subscribers is not an error
        if let Err(broadcast::error::SendError(_)) = self.sender(channel).send(envelope) {
            debug!(channel, "Published with no subscribers");
        }
        Ok(())
    }

    fn close_channel(&self, channel: &str) {
        // Dropping the sender ends every subscriber's stream after the backlog
        self.channels.remove(channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::model::EliminationCause;

    fn eliminated() -> MatchEvent {
        MatchEvent::PlayerEliminated {
            player_id: Uuid::new_v4(),
            cause: EliminationCause::Admin,
            eliminated_by: None,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let bus = BroadcastBus::new();
        let channel = match_channel(Uuid::new_v4());
        let mut rx = bus.subscribe(&channel);

        let first = eliminated();
        let second = eliminated();
        bus.publish(&channel, &first).await.unwrap();
        bus.publish(&channel, &second).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().event, first);
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event, second);
        assert!(envelope.frame.contains("\"player_eliminated\""));
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let bus = BroadcastBus::new();
        tokio_test::assert_ok!(bus.publish("match:nobody", &eliminated()).await);
    }

    #[tokio::test]
    async fn closing_ends_streams() {
        let bus = BroadcastBus::new();
        let mut rx = bus.subscribe("match:x");
        bus.close_channel("match:x");
        assert_eq!(bus.channel_count(), 0);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[test]
    fn channel_name() {
        assert_eq!(
            match_channel(Uuid::nil()),
            "match:00000000-0000-0000-0000-000000000000"
        );
    }
}
