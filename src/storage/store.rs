//! Telemetry store abstraction.
//!
//! Defines the trait the pipeline persists through. `SqliteStore` is the
//! only backend; tests use it in-memory.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::models::{
    ClientDevice, DiagnosticTroubleCode, DtcUpsert, NewRegister, RegisterRow, SensorBinding,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("timed out after {0:?} waiting for the database")]
    Timeout(Duration),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Persistence operations used by ingestion and the read paths.
///
/// Every method is safe to call concurrently from many workers; writes
/// that must be atomic are atomic inside a single call.
pub trait TelemetryStore: Send + Sync {
    /// Device activation record by inventory serial, with its active vehicles.
    fn find_client_device(&self, serial: &str) -> Result<Option<ClientDevice>, StoreError>;

    /// All bindings of a vehicle, active or not, joined with their sensors.
    fn vehicle_bindings(&self, vehicle_id: i64) -> Result<Vec<SensorBinding>, StoreError>;

    fn vehicle_exists(&self, vehicle_id: i64) -> Result<bool, StoreError>;

    /// Insert a batch of registers in one transaction. All or nothing.
    /// Rows whose (binding, timestamp) already exists are skipped; returns
    /// the number actually written.
    fn insert_registers(&self, rows: &[NewRegister]) -> Result<usize, StoreError>;

    /// Create the (vehicle, code) row, reopen it if resolved, or leave it.
    fn record_dtc_sighting(
        &self,
        vehicle_id: i64,
        code: &str,
        description: &str,
        at: DateTime<Utc>,
    ) -> Result<DtcUpsert, StoreError>;

    /// Mark a DTC inactive. `None` when no such id exists.
    fn resolve_dtc(
        &self,
        dtc_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<DiagnosticTroubleCode>, StoreError>;

    fn vehicle_dtcs(
        &self,
        vehicle_id: i64,
        active_only: bool,
    ) -> Result<Vec<DiagnosticTroubleCode>, StoreError>;

    fn dtcs_detected_between(
        &self,
        vehicle_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DiagnosticTroubleCode>, StoreError>;

    /// Reactivate bindings and advance their `last_reading_at`.
    fn touch_bindings(&self, binding_ids: &[i64], at: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Record contact from a device: ping time, pending -> active, and the
    /// vehicle's first/last reading times.
    fn touch_device(
        &self,
        client_device_id: i64,
        vehicle_id: i64,
        reading_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Registers of a vehicle with `from <= recorded_at <= to`, oldest first.
    fn registers_between(
        &self,
        vehicle_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RegisterRow>, StoreError>;

    /// Most recent register of each binding of a vehicle.
    fn latest_readings(&self, vehicle_id: i64) -> Result<Vec<RegisterRow>, StoreError>;
}
