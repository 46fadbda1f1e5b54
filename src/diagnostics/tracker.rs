//! DTC lifecycle tracking.
//!
//! Per (vehicle, code): UNSEEN -> ACTIVE on first sighting, RESOLVED ->
//! ACTIVE on redetection, ACTIVE -> ACTIVE is a no-op. Resolution is an
//! operator action. Atomicity lives in `TelemetryStore::record_dtc_sighting`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::dtc::{describe, ActiveDtc, DtcSummary};
use crate::cache::{self, ReadCache, ReadSource};
use crate::error::IngestError;
use crate::logging::structured::LogContext;
use crate::storage::{DiagnosticTroubleCode, DtcTransition, TelemetryStore};

pub struct DtcTracker {
    store: Arc<dyn TelemetryStore>,
    cache: Arc<dyn ReadCache>,
    cache_ttl: Duration,
}

impl DtcTracker {
    pub fn new(store: Arc<dyn TelemetryStore>, cache: Arc<dyn ReadCache>, cache_ttl: Duration) -> Self {
        Self {
            store,
            cache,
            cache_ttl,
        }
    }

    /// Summaries for a frame's codes, without touching storage.
    pub fn summarize(codes: &[String]) -> Vec<DtcSummary> {
        codes.iter().map(|code| DtcSummary::for_code(code)).collect()
    }

    /// Persist sightings and return their summaries in frame order.
    pub fn record_sightings(
        &self,
        vehicle_id: i64,
        codes: &[String],
        at: DateTime<Utc>,
        ctx: &LogContext,
    ) -> Result<Vec<DtcSummary>, IngestError> {
        let mut summaries = Vec::with_capacity(codes.len());
        for code in codes {
            let upsert = self
                .store
                .record_dtc_sighting(vehicle_id, code, describe(code), at)?;
            match upsert.transition {
                DtcTransition::Created => log::info!(
                    "{} DTC_DETECTED code={} dtc_id={} detected_at={}",
                    ctx,
                    code,
                    upsert.id,
                    upsert.detected_at.to_rfc3339()
                ),
                DtcTransition::Redetected => log::info!(
                    "{} DTC_REDETECTED code={} dtc_id={} first_detected_at={}",
                    ctx,
                    code,
                    upsert.id,
                    upsert.detected_at.to_rfc3339()
                ),
                DtcTransition::Unchanged => {
                    log::debug!("{} DTC_STILL_ACTIVE code={} dtc_id={}", ctx, code, upsert.id)
                }
            }
            summaries.push(DtcSummary::for_code(code));
        }
        Ok(summaries)
    }

    /// Rewrite the `vehicle_dtc_{id}` entry from the stored active set.
    ///
    /// `unsaved` carries sightings that were not persisted (debug frames);
    /// they are appended when not already active.
    pub fn refresh_cache(
        &self,
        vehicle_id: i64,
        unsaved: &[ActiveDtc],
    ) -> Result<Vec<ActiveDtc>, IngestError> {
        let mut active: Vec<ActiveDtc> = self
            .store
            .vehicle_dtcs(vehicle_id, true)?
            .iter()
            .map(|dtc| ActiveDtc::new(&dtc.code, dtc.detected_at))
            .collect();
        for extra in unsaved {
            if !active.iter().any(|a| a.code == extra.code) {
                active.push(extra.clone());
            }
        }

        let key = cache::vehicle_dtc_key(vehicle_id);
        self.cache
            .put(&key, cache::encode(&key, &active)?, self.cache_ttl)?;
        Ok(active)
    }

    /// Mark a DTC resolved and rewrite its vehicle's cache entry.
    pub fn resolve(
        &self,
        dtc_id: i64,
        now: DateTime<Utc>,
        ctx: &LogContext,
    ) -> Result<DiagnosticTroubleCode, IngestError> {
        let dtc = self
            .store
            .resolve_dtc(dtc_id, now)?
            .ok_or_else(|| IngestError::not_found("dtc", &dtc_id.to_string()))?;
        log::info!(
            "{} DTC_RESOLVED dtc_id={} vehicle_id={} code={}",
            ctx,
            dtc.id,
            dtc.vehicle_id,
            dtc.code
        );
        self.refresh_cache(dtc.vehicle_id, &[])?;
        Ok(dtc)
    }

    /// Active DTCs for a vehicle: cache first, storage on a miss.
    pub fn active_dtcs(
        &self,
        vehicle_id: i64,
        ctx: &LogContext,
    ) -> Result<(Vec<ActiveDtc>, ReadSource), IngestError> {
        let key = cache::vehicle_dtc_key(vehicle_id);
        match self.cache.get(&key) {
            Ok(Some(value)) => match serde_json::from_value::<Vec<ActiveDtc>>(value) {
                Ok(active) => return Ok((active, ReadSource::Cache)),
                Err(e) => log::warn!("{} CACHE_DECODE_FAILED key={} error={}", ctx, key, e),
            },
            Ok(None) => log::debug!("{} CACHE_MISS key={}", ctx, key),
            Err(e) => log::warn!("{} CACHE_READ_FAILED key={} error={}", ctx, key, e),
        }

        let active = self.refresh_cache(vehicle_id, &[])?;
        Ok((active, ReadSource::Storage))
    }
}
