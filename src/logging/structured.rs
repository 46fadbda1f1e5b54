//! Structured logging utilities.
//!
//! Provides context-aware logging with frame_id, device serial and vehicle
//! VIN included in every log message.

use std::fmt;

use sha2::{Digest, Sha256};

/// Logging context for one telemetry frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    pub frame_id: String,
    pub device: Option<String>,
    pub vehicle: Option<String>,
}

impl LogContext {
    pub fn new(frame_id: &str) -> Self {
        Self {
            frame_id: frame_id.to_string(),
            device: None,
            vehicle: None,
        }
    }

    pub fn with_device(&self, serial: &str) -> Self {
        Self {
            device: Some(serial.to_string()),
            ..self.clone()
        }
    }

    pub fn with_vehicle(&self, vin: &str) -> Self {
        Self {
            vehicle: Some(vin.to_string()),
            ..self.clone()
        }
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[frame={}]", self.frame_id)?;
        if let Some(device) = &self.device {
            write!(f, " [device={}]", device)?;
        }
        if let Some(vehicle) = &self.vehicle {
            write!(f, " [vehicle={}]", vehicle)?;
        }
        Ok(())
    }
}

/// Initialize the process logger. Safe to call more than once.
pub fn init_logger(level: log::LevelFilter) {
    let _ = env_logger::builder()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
}

/// SHA256 hex digest of a payload, logged instead of the raw bytes.
pub fn payload_digest(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_context_display() {
        let ctx = LogContext::new("frame-123");
        assert_eq!(format!("{}", ctx), "[frame=frame-123]");

        let full = ctx.with_device("DEV1").with_vehicle("VIN1");
        assert_eq!(
            format!("{}", full),
            "[frame=frame-123] [device=DEV1] [vehicle=VIN1]"
        );

        let vehicle_only = ctx.with_vehicle("VIN1");
        assert_eq!(format!("{}", vehicle_only), "[frame=frame-123] [vehicle=VIN1]");
    }

    #[test]
    fn test_payload_digest() {
        let digest = payload_digest(b"not json");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, payload_digest(b"not json"));
        assert_ne!(digest, payload_digest(b"not json!"));
    }
}
