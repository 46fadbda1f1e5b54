//! Database models for telemetry storage.
//!
//! These models represent the structure of data in the database tables.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Activation status of a client device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Pending,
    Active,
    Inactive,
    Maintenance,
    Retired,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Pending => "pending",
            DeviceStatus::Active => "active",
            DeviceStatus::Inactive => "inactive",
            DeviceStatus::Maintenance => "maintenance",
            DeviceStatus::Retired => "retired",
        }
    }

    /// Whether frames from a device in this status are ingested.
    pub fn accepts_frames(&self) -> bool {
        !matches!(self, DeviceStatus::Retired)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            // older rows use the provisioning flow's name
            "pending" | "pending_setup" => Ok(DeviceStatus::Pending),
            "active" => Ok(DeviceStatus::Active),
            "inactive" => Ok(DeviceStatus::Inactive),
            "maintenance" => Ok(DeviceStatus::Maintenance),
            "retired" => Ok(DeviceStatus::Retired),
            other => Err(format!("unknown device status '{}'", other)),
        }
    }
}

/// A vehicle owned by a client device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: i64,
    pub client_device_id: i64,
    pub vin: String,
    pub supported_pids: Vec<String>,
    pub last_reading_at: Option<DateTime<Utc>>,
}

/// Activation record of a provisioned device, with its vehicles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientDevice {
    pub id: i64,
    pub serial_number: String,
    pub status: DeviceStatus,
    pub last_ping: Option<DateTime<Utc>>,
    pub vehicles: Vec<Vehicle>,
}

impl ClientDevice {
    pub fn vehicle_by_vin(&self, vin: &str) -> Option<&Vehicle> {
        self.vehicles.iter().find(|v| v.vin == vin)
    }
}

/// Global sensor catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: i64,
    pub pid: String,
    pub name: String,
    pub unit: String,
    pub requires_calculation: bool,
    pub calculation_formula: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub data_bytes: u8,
}

/// Vehicle x Sensor binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorBinding {
    pub id: i64,
    pub vehicle_id: i64,
    /// Key the device uses for this sensor; falls back to the sensor PID.
    pub mapping_key: Option<String>,
    pub source_type: String,
    pub is_active: bool,
    pub last_reading_at: Option<DateTime<Utc>>,
    pub sensor: Sensor,
}

impl SensorBinding {
    pub fn lookup_key(&self) -> &str {
        match &self.mapping_key {
            Some(key) if !key.is_empty() => key,
            _ => &self.sensor.pid,
        }
    }
}

/// A register row ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRegister {
    pub vehicle_sensor_id: i64,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

/// A persisted reading joined with its sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterRow {
    pub id: i64,
    pub vehicle_sensor_id: i64,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
    pub sensor: Sensor,
}

/// Diagnostic trouble code row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticTroubleCode {
    pub id: i64,
    pub vehicle_id: i64,
    pub code: String,
    pub description: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub redetected_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// What a sighting did to the (vehicle, code) row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtcTransition {
    /// First sighting ever.
    Created,
    /// Sighted while resolved; active window reopened.
    Redetected,
    /// Already active; nothing written.
    Unchanged,
}

impl DtcTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            DtcTransition::Created => "created",
            DtcTransition::Redetected => "redetected",
            DtcTransition::Unchanged => "unchanged",
        }
    }
}

/// Result of an atomic DTC create-or-reopen.
#[derive(Debug, Clone, PartialEq)]
pub struct DtcUpsert {
    pub id: i64,
    pub transition: DtcTransition,
    pub detected_at: DateTime<Utc>,
}

/// Catalog entry used for provisioning.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSensor {
    pub pid: String,
    pub name: String,
    pub category: String,
    pub unit: String,
    pub calculation_formula: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub data_bytes: u8,
}

impl NewSensor {
    pub fn new(pid: &str, name: &str, unit: &str) -> Self {
        Self {
            pid: pid.to_string(),
            name: name.to_string(),
            category: "engine".to_string(),
            unit: unit.to_string(),
            calculation_formula: None,
            min_value: None,
            max_value: None,
            data_bytes: 1,
        }
    }

    pub fn with_formula(mut self, formula: &str, data_bytes: u8) -> Self {
        self.calculation_formula = Some(formula.to_string());
        self.data_bytes = data_bytes;
        self
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor(pid: &str) -> Sensor {
        Sensor {
            id: 1,
            pid: pid.to_string(),
            name: "Engine RPM".to_string(),
            unit: "RPM".to_string(),
            requires_calculation: true,
            calculation_formula: Some("((A * 256) + B) / 4".to_string()),
            min_value: None,
            max_value: None,
            data_bytes: 2,
        }
    }

    #[test]
    fn test_binding_lookup_key() {
        let mut binding = SensorBinding {
            id: 10,
            vehicle_id: 1,
            mapping_key: None,
            source_type: "OBD2".to_string(),
            is_active: true,
            last_reading_at: None,
            sensor: sensor("0x0C"),
        };
        assert_eq!(binding.lookup_key(), "0x0C");

        binding.mapping_key = Some("rpm".to_string());
        assert_eq!(binding.lookup_key(), "rpm");

        binding.mapping_key = Some(String::new());
        assert_eq!(binding.lookup_key(), "0x0C");
    }

    #[test]
    fn test_device_status_parse() {
        assert_eq!("pending_setup".parse(), Ok(DeviceStatus::Pending));
        assert_eq!("retired".parse(), Ok(DeviceStatus::Retired));
        assert!("bogus".parse::<DeviceStatus>().is_err());
        assert!(!DeviceStatus::Retired.accepts_frames());
        assert!(DeviceStatus::Maintenance.accepts_frames());
    }

    #[test]
    fn test_device_round_trips_through_json() {
        let device = ClientDevice {
            id: 3,
            serial_number: "DEV1".to_string(),
            status: DeviceStatus::Active,
            last_ping: None,
            vehicles: vec![Vehicle {
                id: 7,
                client_device_id: 3,
                vin: "VIN1".to_string(),
                supported_pids: vec!["0x0C".to_string()],
                last_reading_at: None,
            }],
        };
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["status"], "active");
        let back: ClientDevice = serde_json::from_value(json).unwrap();
        assert_eq!(back, device);
        assert_eq!(back.vehicle_by_vin("VIN1").map(|v| v.id), Some(7));
        assert!(back.vehicle_by_vin("VIN2").is_none());
    }
}
