//! MQTT subscriber loop.
//!
//! One long-lived task polls the rumqttc event loop. Each publish is
//! validated and pushed onto the queue without waiting; nothing a device
//! sends can stop the loop.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::watch;

use crate::logging::structured::payload_digest;
use crate::pipeline::{FrameContext, FrameSource};
use crate::queue::{EnqueueError, QueueHandle};
use crate::validation::Frame;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
    pub keep_alive: Duration,
    pub reconnect_backoff: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "obdstream".to_string(),
            username: None,
            password: None,
            topic: "vehicles/telemetry".to_string(),
            keep_alive: Duration::from_secs(60),
            reconnect_backoff: Duration::from_secs(5),
        }
    }
}

impl MqttSettings {
    pub fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        options
    }
}

/// What happened to one publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadOutcome {
    Queued { frame_id: String },
    Rejected,
    Dropped,
}

/// Validate a payload and enqueue it. Never blocks.
pub fn handle_payload(topic: &str, payload: &[u8], queue: &QueueHandle) -> PayloadOutcome {
    let ctx = FrameContext::new(FrameSource::Mqtt);
    let frame = match Frame::from_slice(payload) {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!(
                "{} MQTT_PAYLOAD_REJECTED topic={} bytes={} sha256={} error={}",
                ctx.log_context(),
                topic,
                payload.len(),
                payload_digest(payload),
                e
            );
            return PayloadOutcome::Rejected;
        }
    };

    let log_ctx = ctx
        .log_context()
        .with_device(&frame.device_serial)
        .with_vehicle(&frame.vehicle_vin);
    let frame_id = ctx.frame_id.clone();
    match queue.try_enqueue(frame, ctx) {
        Ok(()) => {
            log::debug!("{} MQTT_FRAME_QUEUED topic={}", log_ctx, topic);
            PayloadOutcome::Queued { frame_id }
        }
        Err(e @ EnqueueError::Full(_)) | Err(e @ EnqueueError::Timeout(..)) => {
            log::warn!("{} MQTT_FRAME_DROPPED topic={} error={}", log_ctx, topic, e);
            PayloadOutcome::Dropped
        }
        Err(e @ EnqueueError::Closed(_)) => {
            log::error!("{} MQTT_FRAME_DROPPED topic={} error={}", log_ctx, topic, e);
            PayloadOutcome::Dropped
        }
    }
}

/// Poll the broker until `shutdown` flips to true.
///
/// The subscription is (re)issued on every ConnAck so a reconnect after a
/// broker restart resumes delivery.
pub async fn run(settings: MqttSettings, queue: QueueHandle, mut shutdown: watch::Receiver<bool>) {
    let (client, mut eventloop) = AsyncClient::new(settings.options(), 64);
    log::info!(
        "MQTT_STARTING host={} port={} topic={} client_id={}",
        settings.host,
        settings.port,
        settings.topic,
        settings.client_id
    );

    loop {
        let event = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                log::info!("MQTT_CONNECTED host={} port={}", settings.host, settings.port);
                if let Err(e) = client.try_subscribe(&settings.topic, QoS::AtLeastOnce) {
                    log::error!("MQTT_SUBSCRIBE_FAILED topic={} error={}", settings.topic, e);
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                log::info!("MQTT_SUBSCRIBED topic={}", settings.topic);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handle_payload(&publish.topic, &publish.payload, &queue);
            }
            Ok(_) => {}
            Err(e) => {
                log::error!(
                    "MQTT_CONNECTION_ERROR host={} port={} backoff_ms={} error={}",
                    settings.host,
                    settings.port,
                    settings.reconnect_backoff.as_millis(),
                    e
                );
                tokio::select! {
                    _ = tokio::time::sleep(settings.reconnect_backoff) => {}
                    _ = shutdown.changed() => {}
                }
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    if let Err(e) = client.try_disconnect() {
        log::debug!("MQTT_DISCONNECT_FAILED error={}", e);
    }
    log::info!("MQTT_STOPPED");
}
