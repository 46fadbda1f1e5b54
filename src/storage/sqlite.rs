//! SQLite telemetry store.
//!
//! Thread-safe via an internal mutex (a SQLite `Connection` is not `Sync`).
//! Waiting for the mutex is bounded; a busy database surfaces as
//! `StoreError::Timeout` rather than a stalled worker.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{
    ClientDevice, DeviceStatus, DiagnosticTroubleCode, DtcTransition, DtcUpsert, NewRegister,
    NewSensor, RegisterRow, Sensor, SensorBinding, Vehicle,
};
use super::queries;
use super::store::{StoreError, TelemetryStore};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStore {
    conn: Mutex<Connection>,
    lock_timeout: Duration,
}

impl SqliteStore {
    /// Open (or create) a file-backed database.
    pub fn new(path: &str, lock_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, lock_timeout)
    }

    /// In-memory database (for testing).
    pub fn new_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, DEFAULT_LOCK_TIMEOUT)
    }

    fn from_connection(conn: Connection, lock_timeout: Duration) -> Result<Self, StoreError> {
        conn.busy_timeout(lock_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(queries::SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            lock_timeout,
        })
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .try_lock_for(self.lock_timeout)
            .ok_or(StoreError::Timeout(self.lock_timeout))
    }

    fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
    }

    /// Reads sensor columns starting at `offset`.
    fn row_to_sensor(row: &Row, offset: usize) -> rusqlite::Result<Sensor> {
        Ok(Sensor {
            id: row.get(offset)?,
            pid: row.get(offset + 1)?,
            name: row.get(offset + 2)?,
            unit: row.get(offset + 3)?,
            requires_calculation: row.get(offset + 4)?,
            calculation_formula: row.get(offset + 5)?,
            min_value: row.get(offset + 6)?,
            max_value: row.get(offset + 7)?,
            data_bytes: row.get(offset + 8)?,
        })
    }

    fn row_to_binding(row: &Row) -> rusqlite::Result<SensorBinding> {
        Ok(SensorBinding {
            id: row.get(0)?,
            vehicle_id: row.get(1)?,
            mapping_key: row.get(2)?,
            source_type: row.get(3)?,
            is_active: row.get(4)?,
            last_reading_at: row.get(5)?,
            sensor: Self::row_to_sensor(row, 6)?,
        })
    }

    fn row_to_register(row: &Row) -> rusqlite::Result<RegisterRow> {
        Ok(RegisterRow {
            id: row.get(0)?,
            vehicle_sensor_id: row.get(1)?,
            value: row.get(2)?,
            recorded_at: row.get(3)?,
            sensor: Self::row_to_sensor(row, 4)?,
        })
    }

    fn row_to_vehicle(row: &Row) -> rusqlite::Result<Vehicle> {
        let pids: String = row.get(3)?;
        let supported_pids = serde_json::from_str(&pids)
            .map_err(|e| Self::conversion_error(3, format!("supported_pids: {}", e)))?;
        Ok(Vehicle {
            id: row.get(0)?,
            client_device_id: row.get(1)?,
            vin: row.get(2)?,
            supported_pids,
            last_reading_at: row.get(4)?,
        })
    }

    fn row_to_dtc(row: &Row) -> rusqlite::Result<DiagnosticTroubleCode> {
        Ok(DiagnosticTroubleCode {
            id: row.get(0)?,
            vehicle_id: row.get(1)?,
            code: row.get(2)?,
            description: row.get(3)?,
            detected_at: row.get(4)?,
            redetected_at: row.get(5)?,
            resolved_at: row.get(6)?,
            is_active: row.get(7)?,
        })
    }

    fn dtc_by_id(conn: &Connection, dtc_id: i64) -> rusqlite::Result<Option<DiagnosticTroubleCode>> {
        conn.query_row(&queries::select_dtc_by_id(), [dtc_id], Self::row_to_dtc)
            .optional()
    }

    // -- provisioning --------------------------------------------------------

    /// Register an inventory serial and its pending activation record.
    /// Returns the client device id.
    pub fn provision_device(&self, serial: &str, client_id: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(queries::INSERT_INVENTORY, [serial])?;
        let inventory_id = tx.last_insert_rowid();
        tx.execute(
            queries::INSERT_CLIENT_DEVICE,
            params![inventory_id, client_id, DeviceStatus::Pending.as_str()],
        )?;
        let client_device_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(client_device_id)
    }

    pub fn set_device_status(
        &self,
        client_device_id: i64,
        status: DeviceStatus,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            queries::UPDATE_CLIENT_DEVICE_STATUS,
            params![client_device_id, status.as_str()],
        )?;
        Ok(())
    }

    pub fn provision_vehicle(
        &self,
        client_device_id: i64,
        vin: &str,
        supported_pids: &[&str],
    ) -> Result<i64, StoreError> {
        let pids = serde_json::to_string(supported_pids)
            .map_err(|e| StoreError::Corrupt(format!("supported_pids: {}", e)))?;
        let conn = self.conn()?;
        conn.execute(queries::INSERT_VEHICLE, params![client_device_id, vin, pids])?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert or update a catalog sensor by PID. Returns its id.
    pub fn upsert_sensor(&self, sensor: &NewSensor) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        Self::upsert_sensor_on(&conn, sensor)
    }

    fn upsert_sensor_on(conn: &Connection, sensor: &NewSensor) -> Result<i64, StoreError> {
        let id = conn.query_row(
            queries::UPSERT_SENSOR,
            params![
                sensor.pid,
                sensor.name,
                sensor.category,
                sensor.unit,
                sensor.calculation_formula,
                sensor.min_value,
                sensor.max_value,
                sensor.data_bytes,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Upsert a batch of catalog sensors in one transaction.
    pub fn seed_sensors(&self, sensors: &[NewSensor]) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for sensor in sensors {
            Self::upsert_sensor_on(&tx, sensor)?;
        }
        tx.commit()?;
        Ok(sensors.len())
    }

    /// Bind a sensor to a vehicle. Re-binding updates the mapping key.
    pub fn bind_sensor(
        &self,
        vehicle_id: i64,
        sensor_id: i64,
        mapping_key: Option<&str>,
    ) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let id = conn.query_row(
            queries::INSERT_BINDING,
            params![vehicle_id, sensor_id, mapping_key],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn set_binding_active(&self, binding_id: i64, active: bool) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(queries::SET_BINDING_ACTIVE, params![binding_id, active])?;
        Ok(())
    }

    pub fn register_count(&self, vehicle_id: i64) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(queries::COUNT_REGISTERS, [vehicle_id], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl TelemetryStore for SqliteStore {
    fn find_client_device(&self, serial: &str) -> Result<Option<ClientDevice>, StoreError> {
        let conn = self.conn()?;
        let header = conn
            .query_row(queries::SELECT_CLIENT_DEVICE, [serial], |row| {
                let status: String = row.get(2)?;
                let status = status
                    .parse::<DeviceStatus>()
                    .map_err(|e| Self::conversion_error(2, e))?;
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    status,
                    row.get::<_, Option<DateTime<Utc>>>(3)?,
                ))
            })
            .optional()?;

        let Some((id, serial_number, status, last_ping)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare_cached(queries::SELECT_DEVICE_VEHICLES)?;
        let vehicles = stmt
            .query_map([id], Self::row_to_vehicle)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(ClientDevice {
            id,
            serial_number,
            status,
            last_ping,
            vehicles,
        }))
    }

    fn vehicle_bindings(&self, vehicle_id: i64) -> Result<Vec<SensorBinding>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&queries::select_vehicle_bindings())?;
        let bindings = stmt
            .query_map([vehicle_id], Self::row_to_binding)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(bindings)
    }

    fn vehicle_exists(&self, vehicle_id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let found = conn
            .query_row(queries::SELECT_VEHICLE_EXISTS, [vehicle_id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn insert_registers(&self, rows: &[NewRegister]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(queries::INSERT_REGISTER)?;
            for row in rows {
                inserted += stmt.execute(params![row.vehicle_sensor_id, row.value, row.recorded_at])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn record_dtc_sighting(
        &self,
        vehicle_id: i64,
        code: &str,
        description: &str,
        at: DateTime<Utc>,
    ) -> Result<DtcUpsert, StoreError> {
        let conn = self.conn()?;
        let written = conn
            .query_row(
                queries::UPSERT_DTC,
                params![vehicle_id, code, description, at],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, DateTime<Utc>>(1)?,
                        row.get::<_, Option<DateTime<Utc>>>(2)?,
                    ))
                },
            )
            .optional()?;

        if let Some((id, detected_at, redetected_at)) = written {
            let transition = if redetected_at.is_some() {
                DtcTransition::Redetected
            } else {
                DtcTransition::Created
            };
            return Ok(DtcUpsert {
                id,
                transition,
                detected_at,
            });
        }

        // Row exists and is active; the upsert wrote nothing.
        let (id, detected_at) =
            conn.query_row(queries::SELECT_DTC_BY_CODE, params![vehicle_id, code], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, DateTime<Utc>>(1)?))
            })?;
        Ok(DtcUpsert {
            id,
            transition: DtcTransition::Unchanged,
            detected_at,
        })
    }

    fn resolve_dtc(
        &self,
        dtc_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<DiagnosticTroubleCode>, StoreError> {
        let conn = self.conn()?;
        let Some(current) = Self::dtc_by_id(&conn, dtc_id)? else {
            return Ok(None);
        };
        if !current.is_active {
            return Ok(Some(current));
        }
        conn.execute(queries::RESOLVE_DTC, params![dtc_id, at])?;
        Ok(Self::dtc_by_id(&conn, dtc_id)?)
    }

    fn vehicle_dtcs(
        &self,
        vehicle_id: i64,
        active_only: bool,
    ) -> Result<Vec<DiagnosticTroubleCode>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&queries::select_vehicle_dtcs(active_only))?;
        let dtcs = stmt
            .query_map([vehicle_id], Self::row_to_dtc)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(dtcs)
    }

    fn dtcs_detected_between(
        &self,
        vehicle_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DiagnosticTroubleCode>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&queries::select_dtcs_between())?;
        let dtcs = stmt
            .query_map(params![vehicle_id, from, to], Self::row_to_dtc)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(dtcs)
    }

    fn touch_bindings(&self, binding_ids: &[i64], at: DateTime<Utc>) -> Result<usize, StoreError> {
        if binding_ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare_cached(queries::TOUCH_BINDING)?;
            for id in binding_ids {
                updated += stmt.execute(params![id, at])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    fn touch_device(
        &self,
        client_device_id: i64,
        vehicle_id: i64,
        reading_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(queries::TOUCH_CLIENT_DEVICE, params![client_device_id, now])?;
        tx.execute(queries::TOUCH_VEHICLE, params![vehicle_id, reading_at])?;
        tx.commit()?;
        Ok(())
    }

    fn registers_between(
        &self,
        vehicle_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RegisterRow>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&queries::select_registers_between())?;
        let rows = stmt
            .query_map(params![vehicle_id, from, to], Self::row_to_register)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn latest_readings(&self, vehicle_id: i64) -> Result<Vec<RegisterRow>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&queries::select_latest_readings())?;
        let rows = stmt
            .query_map([vehicle_id], Self::row_to_register)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::Arc;
    use std::thread;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    struct Fixture {
        store: SqliteStore,
        device_id: i64,
        vehicle_id: i64,
        rpm_binding: i64,
        speed_binding: i64,
    }

    fn fixture() -> Fixture {
        let store = SqliteStore::new_in_memory().unwrap();
        let device_id = store.provision_device("DEV1", 1).unwrap();
        let vehicle_id = store
            .provision_vehicle(device_id, "VIN1", &["0x0C", "0x0D"])
            .unwrap();
        let rpm = store
            .upsert_sensor(&NewSensor::new("0x0C", "Engine RPM", "RPM").with_formula("((A * 256) + B) / 4", 2))
            .unwrap();
        let speed = store
            .upsert_sensor(&NewSensor::new("0x0D", "Vehicle Speed", "km/h"))
            .unwrap();
        let rpm_binding = store.bind_sensor(vehicle_id, rpm, None).unwrap();
        let speed_binding = store.bind_sensor(vehicle_id, speed, Some("speed")).unwrap();
        Fixture {
            store,
            device_id,
            vehicle_id,
            rpm_binding,
            speed_binding,
        }
    }

    #[test]
    fn test_find_client_device() {
        let f = fixture();
        let device = f.store.find_client_device("DEV1").unwrap().unwrap();
        assert_eq!(device.id, f.device_id);
        assert_eq!(device.status, DeviceStatus::Pending);
        assert_eq!(device.vehicles.len(), 1);
        assert_eq!(device.vehicles[0].vin, "VIN1");
        assert_eq!(device.vehicles[0].supported_pids, vec!["0x0C", "0x0D"]);

        assert!(f.store.find_client_device("NOPE").unwrap().is_none());
    }

    #[test]
    fn test_bindings_include_inactive() {
        let f = fixture();
        f.store.set_binding_active(f.speed_binding, false).unwrap();

        let bindings = f.store.vehicle_bindings(f.vehicle_id).unwrap();
        assert_eq!(bindings.len(), 2);

        let rpm = bindings.iter().find(|b| b.id == f.rpm_binding).unwrap();
        assert!(rpm.sensor.requires_calculation);
        assert_eq!(rpm.sensor.data_bytes, 2);
        assert_eq!(rpm.lookup_key(), "0x0C");

        let speed = bindings.iter().find(|b| b.id == f.speed_binding).unwrap();
        assert!(!speed.is_active);
        assert!(!speed.sensor.requires_calculation);
        assert_eq!(speed.lookup_key(), "speed");
    }

    #[test]
    fn test_insert_and_query_window() {
        let f = fixture();
        let rows: Vec<NewRegister> = (0..5)
            .map(|i| NewRegister {
                vehicle_sensor_id: f.rpm_binding,
                value: 1000.0 + i as f64,
                recorded_at: at(10, 0, i),
            })
            .collect();
        assert_eq!(f.store.insert_registers(&rows).unwrap(), 5);
        assert_eq!(f.store.insert_registers(&[]).unwrap(), 0);
        assert_eq!(f.store.register_count(f.vehicle_id).unwrap(), 5);

        // window bounds are inclusive
        let window = f
            .store
            .registers_between(f.vehicle_id, at(10, 0, 1), at(10, 0, 3))
            .unwrap();
        let values: Vec<f64> = window.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![1001.0, 1002.0, 1003.0]);
        assert_eq!(window[0].sensor.pid, "0x0C");
    }

    #[test]
    fn test_reinserting_same_timestamp_writes_nothing() {
        let f = fixture();
        let row = NewRegister {
            vehicle_sensor_id: f.rpm_binding,
            value: 1800.0,
            recorded_at: at(10, 0, 0),
        };
        assert_eq!(f.store.insert_registers(&[row.clone()]).unwrap(), 1);
        assert_eq!(f.store.insert_registers(&[row.clone()]).unwrap(), 0);

        // other sensors at the same instant are still written
        let speed = NewRegister {
            vehicle_sensor_id: f.speed_binding,
            ..row.clone()
        };
        assert_eq!(f.store.insert_registers(&[row, speed]).unwrap(), 1);
        assert_eq!(f.store.register_count(f.vehicle_id).unwrap(), 2);
    }

    #[test]
    fn test_sub_second_timestamps_order() {
        let f = fixture();
        let base = at(10, 0, 0);
        let rows = vec![
            NewRegister {
                vehicle_sensor_id: f.rpm_binding,
                value: 1.0,
                recorded_at: base,
            },
            NewRegister {
                vehicle_sensor_id: f.rpm_binding,
                value: 2.0,
                recorded_at: base + ChronoDuration::milliseconds(500),
            },
        ];
        f.store.insert_registers(&rows).unwrap();
        let latest = f.store.latest_readings(f.vehicle_id).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].value, 2.0);

        let window = f
            .store
            .registers_between(f.vehicle_id, base + ChronoDuration::milliseconds(100), at(10, 0, 1))
            .unwrap();
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_latest_readings_per_binding() {
        let f = fixture();
        let rows = vec![
            NewRegister {
                vehicle_sensor_id: f.rpm_binding,
                value: 3000.0,
                recorded_at: at(10, 0, 5),
            },
            // inserted later but recorded earlier
            NewRegister {
                vehicle_sensor_id: f.rpm_binding,
                value: 1000.0,
                recorded_at: at(10, 0, 1),
            },
            NewRegister {
                vehicle_sensor_id: f.speed_binding,
                value: 88.0,
                recorded_at: at(10, 0, 2),
            },
        ];
        f.store.insert_registers(&rows).unwrap();

        let latest = f.store.latest_readings(f.vehicle_id).unwrap();
        assert_eq!(latest.len(), 2);
        let rpm = latest.iter().find(|r| r.sensor.pid == "0x0C").unwrap();
        assert_eq!(rpm.value, 3000.0);
        let speed = latest.iter().find(|r| r.sensor.pid == "0x0D").unwrap();
        assert_eq!(speed.value, 88.0);
    }

    #[test]
    fn test_dtc_lifecycle() {
        let f = fixture();
        let first = f
            .store
            .record_dtc_sighting(f.vehicle_id, "P0301", "Powertrain Issue", at(10, 0, 0))
            .unwrap();
        assert_eq!(first.transition, DtcTransition::Created);
        assert_eq!(first.detected_at, at(10, 0, 0));

        let again = f
            .store
            .record_dtc_sighting(f.vehicle_id, "P0301", "Powertrain Issue", at(10, 5, 0))
            .unwrap();
        assert_eq!(again.transition, DtcTransition::Unchanged);
        assert_eq!(again.id, first.id);
        assert_eq!(again.detected_at, at(10, 0, 0));

        let resolved = f.store.resolve_dtc(first.id, at(11, 0, 0)).unwrap().unwrap();
        assert!(!resolved.is_active);
        assert_eq!(resolved.resolved_at, Some(at(11, 0, 0)));
        assert!(f.store.vehicle_dtcs(f.vehicle_id, true).unwrap().is_empty());

        let back = f
            .store
            .record_dtc_sighting(f.vehicle_id, "P0301", "Powertrain Issue", at(12, 0, 0))
            .unwrap();
        assert_eq!(back.transition, DtcTransition::Redetected);
        assert_eq!(back.id, first.id);
        assert_eq!(back.detected_at, at(10, 0, 0));

        let all = f.store.vehicle_dtcs(f.vehicle_id, false).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_active);
        assert_eq!(all[0].redetected_at, Some(at(12, 0, 0)));
    }

    #[test]
    fn test_resolve_unknown_and_already_resolved() {
        let f = fixture();
        assert!(f.store.resolve_dtc(999, at(10, 0, 0)).unwrap().is_none());

        let dtc = f
            .store
            .record_dtc_sighting(f.vehicle_id, "U0100", "Network Issue", at(10, 0, 0))
            .unwrap();
        f.store.resolve_dtc(dtc.id, at(11, 0, 0)).unwrap();
        let second = f.store.resolve_dtc(dtc.id, at(12, 0, 0)).unwrap().unwrap();
        // first resolution time is kept
        assert_eq!(second.resolved_at, Some(at(11, 0, 0)));
    }

    #[test]
    fn test_concurrent_sightings_create_one_row() {
        let f = fixture();
        let store = Arc::new(f.store);
        let vehicle_id = f.vehicle_id;

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .record_dtc_sighting(vehicle_id, "P0420", "Powertrain Issue", at(10, 0, i))
                        .unwrap()
                        .transition
                })
            })
            .collect();
        let transitions: Vec<DtcTransition> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let created = transitions
            .iter()
            .filter(|t| **t == DtcTransition::Created)
            .count();
        assert_eq!(created, 1);
        assert_eq!(store.vehicle_dtcs(vehicle_id, false).unwrap().len(), 1);
    }

    #[test]
    fn test_dtcs_between_includes_redetections() {
        let f = fixture();
        let dtc = f
            .store
            .record_dtc_sighting(f.vehicle_id, "P0171", "Powertrain Issue", at(8, 0, 0))
            .unwrap();
        f.store.resolve_dtc(dtc.id, at(9, 0, 0)).unwrap();
        f.store
            .record_dtc_sighting(f.vehicle_id, "P0171", "Powertrain Issue", at(10, 30, 0))
            .unwrap();
        f.store
            .record_dtc_sighting(f.vehicle_id, "B0001", "Body Issue", at(13, 0, 0))
            .unwrap();

        let found = f
            .store
            .dtcs_detected_between(f.vehicle_id, at(10, 0, 0), at(11, 0, 0))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, "P0171");
    }

    #[test]
    fn test_touch_bindings_only_moves_forward() {
        let f = fixture();
        f.store.set_binding_active(f.speed_binding, false).unwrap();

        let n = f
            .store
            .touch_bindings(&[f.rpm_binding, f.speed_binding], at(10, 0, 10))
            .unwrap();
        assert_eq!(n, 2);
        // stale frame
        f.store.touch_bindings(&[f.rpm_binding], at(10, 0, 5)).unwrap();

        let bindings = f.store.vehicle_bindings(f.vehicle_id).unwrap();
        assert!(bindings.iter().all(|b| b.is_active));
        assert!(bindings
            .iter()
            .all(|b| b.last_reading_at == Some(at(10, 0, 10))));
    }

    #[test]
    fn test_touch_device_activates_pending() {
        let f = fixture();
        f.store
            .touch_device(f.device_id, f.vehicle_id, at(10, 0, 0), at(10, 0, 2))
            .unwrap();
        let device = f.store.find_client_device("DEV1").unwrap().unwrap();
        assert_eq!(device.status, DeviceStatus::Active);
        assert_eq!(device.last_ping, Some(at(10, 0, 2)));
        assert_eq!(device.vehicles[0].last_reading_at, Some(at(10, 0, 0)));

        f.store.set_device_status(f.device_id, DeviceStatus::Maintenance).unwrap();
        f.store
            .touch_device(f.device_id, f.vehicle_id, at(9, 0, 0), at(10, 1, 0))
            .unwrap();
        let device = f.store.find_client_device("DEV1").unwrap().unwrap();
        assert_eq!(device.status, DeviceStatus::Maintenance);
        assert_eq!(device.vehicles[0].last_reading_at, Some(at(10, 0, 0)));
    }

    #[test]
    fn test_lock_timeout() {
        let store = SqliteStore::new_in_memory()
            .unwrap()
            .with_lock_timeout(Duration::from_millis(20));
        let _held = store.conn.lock();
        match store.vehicle_exists(1) {
            Err(StoreError::Timeout(d)) => assert_eq!(d, Duration::from_millis(20)),
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_seed_sensors_is_idempotent() {
        let store = SqliteStore::new_in_memory().unwrap();
        let sensors = vec![
            NewSensor::new("0x05", "Engine Coolant Temperature", "°C")
                .with_formula("A - 40", 1)
                .with_bounds(-40.0, 215.0),
            NewSensor::new("0x0D", "Vehicle Speed", "km/h"),
        ];
        assert_eq!(store.seed_sensors(&sensors).unwrap(), 2);
        assert_eq!(store.seed_sensors(&sensors).unwrap(), 2);

        let id = store.upsert_sensor(&sensors[0]).unwrap();
        let device = store.provision_device("DEV9", 1).unwrap();
        let vehicle = store.provision_vehicle(device, "VIN9", &[]).unwrap();
        store.bind_sensor(vehicle, id, None).unwrap();
        let bindings = store.vehicle_bindings(vehicle).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].sensor.min_value, Some(-40.0));
        assert!(store.vehicle_exists(vehicle).unwrap());
        assert!(!store.vehicle_exists(vehicle + 100).unwrap());
    }
}
