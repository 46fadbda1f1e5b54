//! In-process fan-out of realtime events.
//!
//! Each channel is a `tokio::sync::broadcast` sender created on first
//! subscribe. Publishing never waits on subscribers: a slow receiver lags
//! and loses old events, a channel nobody listens to drops the event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

use super::event::{TelemetryEvent, EVENT_NAME};
use super::{BroadcastError, Publisher};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// What subscribers receive.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub channel: String,
    pub event: &'static str,
    pub payload: Arc<Value>,
}

pub struct BroadcastHub {
    capacity: usize,
    channels: RwLock<HashMap<String, broadcast::Sender<Envelope>>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Envelope> {
        if let Some(sender) = self.channels.read().get(channel) {
            return sender.subscribe();
        }
        let mut channels = self.channels.write();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Remove channels whose subscribers have all gone. Returns how many
    /// were removed.
    pub fn prune(&self) -> usize {
        let mut channels = self.channels.write();
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        before - channels.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// (delivered, dropped) publish counts.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.delivered.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
        )
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl Publisher for BroadcastHub {
    fn publish(&self, channel: &str, event: &TelemetryEvent) -> Result<(), BroadcastError> {
        if channel.is_empty() {
            return Err(BroadcastError::EmptyChannel);
        }
        let payload =
            serde_json::to_value(event).map_err(|e| BroadcastError::Encoding(e.to_string()))?;

        let sent = match self.channels.read().get(channel) {
            Some(sender) => sender
                .send(Envelope {
                    channel: channel.to_string(),
                    event: EVENT_NAME,
                    payload: Arc::new(payload),
                })
                .is_ok(),
            None => false,
        };

        if sent {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            log::debug!("BROADCAST_NO_SUBSCRIBERS channel={}", channel);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn event(vehicle_id: i64) -> TelemetryEvent {
        TelemetryEvent::new(vehicle_id, 1, Utc::now(), BTreeMap::new(), vec![])
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let hub = BroadcastHub::default();
        let mut rx = hub.subscribe("vehicle.1");
        assert_eq!(hub.subscriber_count("vehicle.1"), 1);

        hub.publish("vehicle.1", &event(1)).unwrap();
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event, "telemetry.updated");
        assert_eq!(envelope.channel, "vehicle.1");
        assert_eq!(envelope.payload["vehicle_id"], 1);
        assert_eq!(hub.stats(), (1, 0));
    }

    #[tokio::test]
    async fn test_channels_are_private() {
        let hub = BroadcastHub::default();
        let mut other = hub.subscribe("vehicle.2");
        hub.publish("vehicle.1", &event(1)).unwrap();
        assert!(other.try_recv().is_err());
        assert_eq!(hub.stats(), (0, 1));
    }

    #[test]
    fn test_prune_removes_abandoned_channels() {
        let hub = BroadcastHub::default();
        let kept = hub.subscribe("vehicle.1");
        drop(hub.subscribe("vehicle.2"));
        drop(hub.subscribe("device.7"));
        assert_eq!(hub.channel_count(), 3);

        assert_eq!(hub.prune(), 2);
        assert_eq!(hub.channel_count(), 1);
        assert_eq!(hub.subscriber_count("vehicle.1"), 1);

        // a later subscriber recreates the channel
        let _again = hub.subscribe("vehicle.2");
        assert_eq!(hub.subscriber_count("vehicle.2"), 1);
        drop(kept);
        assert_eq!(hub.prune(), 1);
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let hub = BroadcastHub::default();
        assert!(hub.publish("vehicle.9", &event(9)).is_ok());
        assert!(matches!(
            hub.publish("", &event(9)),
            Err(BroadcastError::EmptyChannel)
        ));
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block() {
        let hub = BroadcastHub::new(2);
        let mut rx = hub.subscribe("vehicle.1");
        for _ in 0..10 {
            hub.publish("vehicle.1", &event(1)).unwrap();
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert!(rx.recv().await.is_ok());
    }
}
