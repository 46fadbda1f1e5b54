//! Main frame ingestion pipeline.
//!
//! Coordinates the full frame processing workflow:
//! 1. Device and vehicle resolution (drop the frame when either is unknown)
//! 2. Timestamp reconciliation
//! 3. Binding resolution and value conversion, register batch
//! 4. DTC sightings
//! 5. Realtime publish (vehicle and device channels)
//! 6. Read cache write-through
//! 7. Binding and device activity stamps
//!
//! Debug frames run every step except durable writes.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::context::FrameContext;
use crate::cache::{self, ReadCache};
use crate::catalog::SensorCatalog;
use crate::diagnostics::{ActiveDtc, DtcSummary, DtcTracker};
use crate::error::IngestError;
use crate::logging::structured::LogContext;
use crate::realtime::{device_channel, vehicle_channel, Publisher, SensorReading, TelemetryEvent};
use crate::storage::{ClientDevice, NewRegister, TelemetryStore, Vehicle};
use crate::validation::{reconcile, Frame};

/// Source of "now"; replaced in tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A frame's resolved device and vehicle.
#[derive(Debug, Clone)]
pub struct Target {
    pub device: ClientDevice,
    pub vehicle: Vehicle,
}

/// What one frame did.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub frame_id: String,
    pub vehicle_id: i64,
    pub device_id: i64,
    pub timestamp: DateTime<Utc>,
    pub timestamp_corrected: bool,
    pub debug: bool,
    pub readings_decoded: usize,
    pub registers_written: usize,
    pub unmapped: Vec<String>,
    /// Malformed sensor keys or DTC entries skipped by validation.
    pub dropped: Vec<String>,
    pub formula_fallbacks: usize,
    pub dtc_count: usize,
}

pub struct Ingestor {
    store: Arc<dyn TelemetryStore>,
    cache: Arc<dyn ReadCache>,
    publisher: Arc<dyn Publisher>,
    catalog: Arc<SensorCatalog>,
    dtcs: DtcTracker,
    cache_ttl: Duration,
    clock: Clock,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        cache: Arc<dyn ReadCache>,
        publisher: Arc<dyn Publisher>,
        catalog: Arc<SensorCatalog>,
        cache_ttl: Duration,
    ) -> Self {
        let dtcs = DtcTracker::new(Arc::clone(&store), Arc::clone(&cache), cache_ttl);
        Self {
            store,
            cache,
            publisher,
            catalog,
            dtcs,
            cache_ttl,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn TelemetryStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn ReadCache> {
        &self.cache
    }

    pub fn dtcs(&self) -> &DtcTracker {
        &self.dtcs
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Process a frame. Never fails: errors are logged and the frame dropped.
    pub fn ingest(&self, frame: &Frame, ctx: &FrameContext) -> Option<IngestOutcome> {
        let log_ctx = ctx
            .log_context()
            .with_device(&frame.device_serial)
            .with_vehicle(&frame.vehicle_vin);

        match self.try_ingest(frame, ctx) {
            Ok(outcome) => Some(outcome),
            Err(e @ IngestError::NotFound { .. }) | Err(e @ IngestError::Validation(_)) => {
                log::warn!(
                    "{} FRAME_DROPPED kind={} source={} error={}",
                    log_ctx,
                    e.kind(),
                    ctx.source,
                    e
                );
                None
            }
            Err(e) => {
                log::error!(
                    "{} FRAME_FAILED kind={} source={} error={}",
                    log_ctx,
                    e.kind(),
                    ctx.source,
                    e
                );
                None
            }
        }
    }

    /// Device and vehicle for a frame, via the device cache.
    ///
    /// The cache entry is written only once both resolve, so an unknown
    /// device or VIN leaves no trace.
    pub fn resolve_target(&self, frame: &Frame, log_ctx: &LogContext) -> Result<Target, IngestError> {
        let serial = frame.device_serial.as_str();
        let key = cache::client_device_key(serial);

        if let Some(device) = self.cached_device(&key, log_ctx) {
            if let Some(vehicle) = device.vehicle_by_vin(&frame.vehicle_vin).cloned() {
                return Ok(Target { device, vehicle });
            }
            // vehicle may have been provisioned since the entry was written
        }

        let device = self
            .store
            .find_client_device(serial)?
            .filter(|d| d.status.accepts_frames())
            .ok_or_else(|| IngestError::not_found("device", serial))?;
        let vehicle = device
            .vehicle_by_vin(&frame.vehicle_vin)
            .cloned()
            .ok_or_else(|| IngestError::not_found("vehicle", &frame.vehicle_vin))?;

        match cache::encode(&key, &device) {
            Ok(value) => {
                if let Err(e) = self.cache.put(&key, value, self.cache_ttl) {
                    log::warn!("{} CACHE_WRITE_FAILED key={} error={}", log_ctx, key, e);
                }
            }
            Err(e) => log::warn!("{} CACHE_WRITE_FAILED key={} error={}", log_ctx, key, e),
        }

        Ok(Target { device, vehicle })
    }

    fn cached_device(&self, key: &str, log_ctx: &LogContext) -> Option<ClientDevice> {
        match self.cache.get(key) {
            Ok(Some(value)) => match serde_json::from_value::<ClientDevice>(value) {
                Ok(device) if device.status.accepts_frames() => Some(device),
                Ok(_) => None,
                Err(e) => {
                    log::warn!("{} CACHE_DECODE_FAILED key={} error={}", log_ctx, key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                log::warn!("{} CACHE_READ_FAILED key={} error={}", log_ctx, key, e);
                None
            }
        }
    }

    /// Process a frame, returning the first failure.
    pub fn try_ingest(&self, frame: &Frame, ctx: &FrameContext) -> Result<IngestOutcome, IngestError> {
        let log_ctx = ctx
            .log_context()
            .with_device(&frame.device_serial)
            .with_vehicle(&frame.vehicle_vin);
        log::debug!(
            "{} FRAME_PROCESS_START source={} readings={} dtcs={} debug={}",
            log_ctx,
            ctx.source,
            frame.readings.len(),
            frame.dtc_codes.len(),
            frame.debug
        );
        for entry in &frame.dropped {
            log::warn!("{} FRAME_ENTRY_DROPPED entry={:?}", log_ctx, entry);
        }

        // [1] DEVICE / VEHICLE
        let Target { device, vehicle } = self.resolve_target(frame, &log_ctx)?;

        // [2] TIMESTAMP
        let now = self.now();
        let reconciled = reconcile(&frame.device_timestamp, now);
        if reconciled.was_corrected {
            log::info!(
                "{} TIMESTAMP_CORRECTED reason={} device_dt={:?} drift_secs={:?}",
                log_ctx,
                reconciled.reason,
                frame.device_timestamp,
                reconciled.drift_secs
            );
        }
        let timestamp = reconciled.timestamp;

        // [3] READINGS
        let bindings = self.catalog.bindings_for(self.store.as_ref(), vehicle.id, &log_ctx)?;
        let mut data = BTreeMap::new();
        let mut registers = Vec::new();
        let mut touched = Vec::new();
        let mut seen = HashSet::new();
        let mut unmapped = Vec::new();
        let mut formula_fallbacks = 0;

        for (key, raw) in frame.numeric_readings() {
            let Some(resolved) = bindings.resolve(key) else {
                log::debug!("{} PID_UNMAPPED key={} raw={}", log_ctx, key, raw);
                unmapped.push(key.to_string());
                continue;
            };
            let binding = &resolved.binding;
            if !seen.insert(binding.id) {
                log::debug!(
                    "{} PID_DUPLICATE key={} binding_id={}",
                    log_ctx,
                    key,
                    binding.id
                );
                continue;
            }

            let processed = match resolved.process(raw) {
                Ok(value) => value,
                Err(e) => {
                    formula_fallbacks += 1;
                    log::warn!(
                        "{} FORMULA_FALLBACK pid={} formula={:?} raw={} error={}",
                        log_ctx,
                        binding.sensor.pid,
                        binding.sensor.calculation_formula,
                        raw,
                        e
                    );
                    raw
                }
            };
            if resolved.out_of_bounds(processed) {
                log::debug!(
                    "{} SENSOR_OUT_OF_RANGE pid={} value={} min={:?} max={:?}",
                    log_ctx,
                    binding.sensor.pid,
                    processed,
                    binding.sensor.min_value,
                    binding.sensor.max_value
                );
            }

            registers.push(NewRegister {
                vehicle_sensor_id: binding.id,
                value: raw,
                recorded_at: timestamp,
            });
            touched.push(binding.id);
            data.insert(
                binding.sensor.pid.clone(),
                SensorReading {
                    pid: binding.sensor.pid.clone(),
                    raw_value: raw,
                    processed_value: processed,
                    unit: binding.sensor.unit.clone(),
                    name: binding.sensor.name.clone(),
                    timestamp,
                },
            );
        }

        let registers_written = if frame.debug {
            0
        } else {
            self.store.insert_registers(&registers)?
        };

        // [4] DTC
        let dtc_codes: Vec<DtcSummary> = if frame.dtc_codes.is_empty() {
            Vec::new()
        } else if frame.debug {
            DtcTracker::summarize(&frame.dtc_codes)
        } else {
            self.dtcs
                .record_sightings(vehicle.id, &frame.dtc_codes, timestamp, &log_ctx)?
        };

        // [5] PUBLISH
        let event = TelemetryEvent::new(vehicle.id, device.id, timestamp, data, dtc_codes);
        for channel in [vehicle_channel(vehicle.id), device_channel(device.id)] {
            if let Err(e) = self.publisher.publish(&channel, &event) {
                log::warn!("{} BROADCAST_FAILED channel={} error={}", log_ctx, channel, e);
            }
        }

        // [6] CACHE
        self.write_cache(&event, frame, timestamp, &log_ctx);

        // [7] ACTIVITY
        if !frame.debug {
            self.store.touch_bindings(&touched, timestamp)?;
            self.store.touch_device(device.id, vehicle.id, timestamp, now)?;
        }

        let outcome = IngestOutcome {
            frame_id: ctx.frame_id.clone(),
            vehicle_id: vehicle.id,
            device_id: device.id,
            timestamp,
            timestamp_corrected: reconciled.was_corrected,
            debug: frame.debug,
            readings_decoded: event.data.len(),
            registers_written,
            unmapped,
            dropped: frame.dropped.clone(),
            formula_fallbacks,
            dtc_count: event.dtc_codes.len(),
        };
        log::info!(
            "{} FRAME_INGESTED vehicle_id={} decoded={} registers={} unmapped={} dtcs={} debug={}",
            log_ctx,
            outcome.vehicle_id,
            outcome.readings_decoded,
            outcome.registers_written,
            outcome.unmapped.len(),
            outcome.dtc_count,
            outcome.debug
        );
        Ok(outcome)
    }

    /// Write-through of the telemetry and DTC entries. The telemetry entry is
    /// replaced on every frame, even when nothing decoded, so dashboards never
    /// show values older than the last frame. Failures are logged; the cache
    /// is not authoritative.
    fn write_cache(
        &self,
        event: &TelemetryEvent,
        frame: &Frame,
        timestamp: DateTime<Utc>,
        log_ctx: &LogContext,
    ) {
        let key = cache::vehicle_telemetry_key(event.vehicle_id);
        let written = cache::encode(&key, &event.processed_map())
            .and_then(|value| self.cache.put(&key, value, self.cache_ttl));
        if let Err(e) = written {
            log::warn!("{} CACHE_WRITE_FAILED key={} error={}", log_ctx, key, e);
        }

        if !frame.dtc_codes.is_empty() {
            let unsaved: Vec<ActiveDtc> = if frame.debug {
                frame
                    .dtc_codes
                    .iter()
                    .map(|code| ActiveDtc::new(code, timestamp))
                    .collect()
            } else {
                Vec::new()
            };
            if let Err(e) = self.dtcs.refresh_cache(event.vehicle_id, &unsaved) {
                log::warn!(
                    "{} CACHE_WRITE_FAILED key={} error={}",
                    log_ctx,
                    cache::vehicle_dtc_key(event.vehicle_id),
                    e
                );
            }
        }
    }
}
