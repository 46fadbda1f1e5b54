//! Realtime event payload.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diagnostics::DtcSummary;

pub const EVENT_NAME: &str = "telemetry.updated";

pub fn vehicle_channel(vehicle_id: i64) -> String {
    format!("vehicle.{}", vehicle_id)
}

pub fn device_channel(client_device_id: i64) -> String {
    format!("device.{}", client_device_id)
}

/// One decoded reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub pid: String,
    pub raw_value: f64,
    pub processed_value: f64,
    pub unit: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything a dashboard needs from one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub vehicle_id: i64,
    pub device_id: i64,
    pub timestamp: DateTime<Utc>,
    /// Keyed by catalog PID.
    pub data: BTreeMap<String, SensorReading>,
    pub dtc_codes: Vec<DtcSummary>,
    pub has_dtc: bool,
}

impl TelemetryEvent {
    pub fn new(
        vehicle_id: i64,
        device_id: i64,
        timestamp: DateTime<Utc>,
        data: BTreeMap<String, SensorReading>,
        dtc_codes: Vec<DtcSummary>,
    ) -> Self {
        let has_dtc = !dtc_codes.is_empty();
        Self {
            vehicle_id,
            device_id,
            timestamp,
            data,
            dtc_codes,
            has_dtc,
        }
    }

    /// `pid -> processed_value`, the shape of the telemetry cache entry.
    pub fn processed_map(&self) -> BTreeMap<String, f64> {
        self.data
            .iter()
            .map(|(pid, reading)| (pid.clone(), reading.processed_value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_wire_shape() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut data = BTreeMap::new();
        data.insert(
            "0x0C".to_string(),
            SensorReading {
                pid: "0x0C".to_string(),
                raw_value: 1800.0,
                processed_value: 450.0,
                unit: "RPM".to_string(),
                name: "Engine RPM".to_string(),
                timestamp: ts,
            },
        );
        let event = TelemetryEvent::new(1, 2, ts, data, vec![DtcSummary::for_code("P0420")]);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["vehicle_id"], 1);
        assert_eq!(json["device_id"], 2);
        assert_eq!(json["has_dtc"], true);
        assert_eq!(json["data"]["0x0C"]["processed_value"], 450.0);
        assert_eq!(json["data"]["0x0C"]["unit"], "RPM");
        assert_eq!(json["dtc_codes"][0]["severity"], "high");
        assert_eq!(event.processed_map().get("0x0C"), Some(&450.0));
    }

    #[test]
    fn test_channels() {
        assert_eq!(vehicle_channel(5), "vehicle.5");
        assert_eq!(device_channel(9), "device.9");
    }
}
