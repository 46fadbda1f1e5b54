//! Trip replay from the register log.
//!
//! Registers in a window are grouped into frames by `recorded_at`; each
//! reading is re-decoded with the sensor's current formula. GPS sensors
//! additionally feed a path.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::catalog::Conversion;
use crate::diagnostics::{describe, severity, Severity};
use crate::storage::{DiagnosticTroubleCode, RegisterRow, StoreError, TelemetryStore};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("window start {from} must precede end {to}")]
    InvalidWindow {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },

    #[error("persistence failure: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplaySensor {
    pub pid: String,
    pub name: String,
    pub unit: String,
    pub raw_value: f64,
    pub processed_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayFrame {
    pub timestamp: DateTime<Utc>,
    pub sensors: BTreeMap<String, ReplaySensor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpsPoint {
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
    pub speed_kmh: Option<f64>,
    pub altitude_m: Option<f64>,
    pub heading: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DtcEvent {
    pub code: String,
    pub description: String,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
    pub redetected_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl From<DiagnosticTroubleCode> for DtcEvent {
    fn from(dtc: DiagnosticTroubleCode) -> Self {
        Self {
            description: describe(&dtc.code).to_string(),
            severity: severity(&dtc.code),
            code: dtc.code,
            detected_at: dtc.detected_at,
            redetected_at: dtc.redetected_at,
            resolved_at: dtc.resolved_at,
            is_active: dtc.is_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub frames: usize,
    pub registers: usize,
    pub sensors: usize,
    pub gps_points: usize,
    pub dtc_events: usize,
    pub first_reading_at: Option<DateTime<Utc>>,
    pub last_reading_at: Option<DateTime<Utc>>,
    pub duration_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Replay {
    pub vehicle_id: i64,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub frames: Vec<ReplayFrame>,
    pub gps_path: Vec<GpsPoint>,
    pub dtc_events: Vec<DtcEvent>,
    pub summary: ReplaySummary,
}

/// Which GPS field a PID feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GpsField {
    Lat,
    Lng,
    Speed,
    Altitude,
    Heading,
}

fn gps_field(pid: &str) -> Option<GpsField> {
    match pid.to_ascii_lowercase().as_str() {
        "lat" | "latitude" => Some(GpsField::Lat),
        "lng" | "lon" | "longitude" => Some(GpsField::Lng),
        "vel_kmh" | "speed_kmh" => Some(GpsField::Speed),
        "alt_m" | "altitude" => Some(GpsField::Altitude),
        "heading" | "rumbo" => Some(GpsField::Heading),
        _ => None,
    }
}

#[derive(Default)]
struct PartialFix {
    lat: Option<f64>,
    lng: Option<f64>,
    speed_kmh: Option<f64>,
    altitude_m: Option<f64>,
    heading: Option<f64>,
}

impl PartialFix {
    fn set(&mut self, field: GpsField, value: f64) {
        match field {
            GpsField::Lat => self.lat = Some(value),
            GpsField::Lng => self.lng = Some(value),
            GpsField::Speed => self.speed_kmh = Some(value),
            GpsField::Altitude => self.altitude_m = Some(value),
            GpsField::Heading => self.heading = Some(value),
        }
    }

    /// A point needs both coordinates.
    fn into_point(self, timestamp: DateTime<Utc>) -> Option<GpsPoint> {
        Some(GpsPoint {
            timestamp,
            lat: self.lat?,
            lng: self.lng?,
            speed_kmh: self.speed_kmh,
            altitude_m: self.altitude_m,
            heading: self.heading,
        })
    }
}

fn decode(row: &RegisterRow) -> f64 {
    Conversion::for_sensor(&row.sensor)
        .apply(row.value, row.sensor.data_bytes)
        .unwrap_or(row.value)
}

/// Build a replay for `from <= recorded_at <= to`.
pub fn build_replay(
    store: &dyn TelemetryStore,
    vehicle_id: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Replay, ReplayError> {
    if from >= to {
        return Err(ReplayError::InvalidWindow { from, to });
    }

    let rows = store.registers_between(vehicle_id, from, to)?;
    let registers = rows.len();

    let mut grouped: BTreeMap<DateTime<Utc>, (BTreeMap<String, ReplaySensor>, PartialFix)> =
        BTreeMap::new();
    let mut pids = BTreeSet::new();

    for row in &rows {
        let processed = decode(row);
        let (sensors, fix) = grouped.entry(row.recorded_at).or_default();
        if let Some(field) = gps_field(&row.sensor.pid) {
            fix.set(field, processed);
        }
        pids.insert(row.sensor.pid.clone());
        sensors.insert(
            row.sensor.pid.clone(),
            ReplaySensor {
                pid: row.sensor.pid.clone(),
                name: row.sensor.name.clone(),
                unit: row.sensor.unit.clone(),
                raw_value: row.value,
                processed_value: processed,
            },
        );
    }

    let mut frames = Vec::with_capacity(grouped.len());
    let mut gps_path = Vec::new();
    for (timestamp, (sensors, fix)) in grouped {
        if let Some(point) = fix.into_point(timestamp) {
            gps_path.push(point);
        }
        frames.push(ReplayFrame { timestamp, sensors });
    }

    let dtc_events: Vec<DtcEvent> = store
        .dtcs_detected_between(vehicle_id, from, to)?
        .into_iter()
        .map(DtcEvent::from)
        .collect();

    let first_reading_at = frames.first().map(|f| f.timestamp);
    let last_reading_at = frames.last().map(|f| f.timestamp);
    let duration_secs = match (first_reading_at, last_reading_at) {
        (Some(first), Some(last)) => (last - first).num_seconds(),
        _ => 0,
    };

    let summary = ReplaySummary {
        frames: frames.len(),
        registers,
        sensors: pids.len(),
        gps_points: gps_path.len(),
        dtc_events: dtc_events.len(),
        first_reading_at,
        last_reading_at,
        duration_secs,
    };

    Ok(Replay {
        vehicle_id,
        from,
        to,
        frames,
        gps_path,
        dtc_events,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewRegister, NewSensor, SqliteStore};
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn setup() -> (SqliteStore, i64, i64, i64, i64) {
        let store = SqliteStore::new_in_memory().unwrap();
        let device = store.provision_device("DEV1", 1).unwrap();
        let vehicle = store.provision_vehicle(device, "VIN1", &[]).unwrap();
        let rpm = store
            .upsert_sensor(&NewSensor::new("0x0C", "Engine RPM", "RPM").with_formula("((A*256)+B)/4", 2))
            .unwrap();
        let lat = store.upsert_sensor(&NewSensor::new("lat", "Latitude", "°")).unwrap();
        let lng = store.upsert_sensor(&NewSensor::new("lng", "Longitude", "°")).unwrap();
        let rpm_b = store.bind_sensor(vehicle, rpm, None).unwrap();
        let lat_b = store.bind_sensor(vehicle, lat, None).unwrap();
        let lng_b = store.bind_sensor(vehicle, lng, None).unwrap();
        (store, vehicle, rpm_b, lat_b, lng_b)
    }

    #[test]
    fn test_round_trip_in_order() {
        let (store, vehicle, rpm, _, _) = setup();
        // inserted out of order
        let raws = [(3, 2000.0), (1, 1000.0), (2, 1800.0)];
        let rows: Vec<NewRegister> = raws
            .iter()
            .map(|(s, v)| NewRegister {
                vehicle_sensor_id: rpm,
                value: *v,
                recorded_at: at(*s),
            })
            .collect();
        store.insert_registers(&rows).unwrap();

        let replay = build_replay(&store, vehicle, at(1), at(3)).unwrap();
        let raw: Vec<f64> = replay
            .frames
            .iter()
            .map(|f| f.sensors["0x0C"].raw_value)
            .collect();
        assert_eq!(raw, vec![1000.0, 1800.0, 2000.0]);
        assert_eq!(replay.frames[1].sensors["0x0C"].processed_value, 450.0);
        assert_eq!(replay.summary.registers, 3);
        assert_eq!(replay.summary.duration_secs, 2);
        assert!(replay.gps_path.is_empty());
    }

    #[test]
    fn test_gps_path_needs_both_coordinates() {
        let (store, vehicle, _, lat, lng) = setup();
        store
            .insert_registers(&[
                NewRegister {
                    vehicle_sensor_id: lat,
                    value: 19.43,
                    recorded_at: at(0),
                },
                NewRegister {
                    vehicle_sensor_id: lng,
                    value: -99.13,
                    recorded_at: at(0),
                },
                NewRegister {
                    vehicle_sensor_id: lat,
                    value: 19.44,
                    recorded_at: at(5),
                },
            ])
            .unwrap();

        let replay = build_replay(&store, vehicle, at(0), at(10)).unwrap();
        assert_eq!(replay.frames.len(), 2);
        assert_eq!(replay.gps_path.len(), 1);
        assert_eq!(replay.gps_path[0].lat, 19.43);
        assert_eq!(replay.gps_path[0].lng, -99.13);
        assert_eq!(replay.summary.sensors, 2);
    }

    #[test]
    fn test_dtc_events_in_window() {
        let (store, vehicle, _, _, _) = setup();
        store
            .record_dtc_sighting(vehicle, "P0420", "Powertrain Issue", at(30))
            .unwrap();
        store
            .record_dtc_sighting(vehicle, "C0035", "Chassis Issue", at(500))
            .unwrap();
        let replay = build_replay(&store, vehicle, at(0), at(60)).unwrap();
        assert_eq!(replay.dtc_events.len(), 1);
        assert_eq!(replay.dtc_events[0].code, "P0420");
        assert_eq!(replay.dtc_events[0].severity, Severity::High);
        assert!(replay.frames.is_empty());
        assert_eq!(replay.summary.first_reading_at, None);
    }

    #[test]
    fn test_invalid_window() {
        let (store, vehicle, _, _, _) = setup();
        assert!(matches!(
            build_replay(&store, vehicle, at(10), at(10)),
            Err(ReplayError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn test_gps_aliases() {
        assert_eq!(gps_field("RUMBO"), Some(GpsField::Heading));
        assert_eq!(gps_field("vel_kmh"), Some(GpsField::Speed));
        assert_eq!(gps_field("0x0D"), None);
    }
}
