//! Realtime publishing of decoded frames to dashboard subscribers.

pub mod event;
pub mod hub;

use thiserror::Error;

pub use event::{device_channel, vehicle_channel, SensorReading, TelemetryEvent, EVENT_NAME};
pub use hub::{BroadcastHub, Envelope, DEFAULT_CHANNEL_CAPACITY};

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("channel name is empty")]
    EmptyChannel,

    #[error("event payload could not be encoded: {0}")]
    Encoding(String),
}

/// Fire-and-forget delivery of an event to one channel.
pub trait Publisher: Send + Sync {
    fn publish(&self, channel: &str, event: &TelemetryEvent) -> Result<(), BroadcastError>;
}
