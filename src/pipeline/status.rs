//! Latest-telemetry read path.
//!
//! Serves `vehicle_telemetry_{id}` from the cache and rebuilds it from the
//! newest register of each binding on a miss.

use std::collections::BTreeMap;

use serde::Serialize;

use super::ingestion::Ingestor;
use crate::cache::{self, ReadCache, ReadSource};
use crate::catalog::Conversion;
use crate::error::IngestError;
use crate::logging::structured::LogContext;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub vehicle_id: i64,
    pub source: ReadSource,
    /// `pid -> processed_value`
    pub telemetry: BTreeMap<String, f64>,
}

impl Ingestor {
    pub fn telemetry_snapshot(
        &self,
        vehicle_id: i64,
        ctx: &LogContext,
    ) -> Result<TelemetrySnapshot, IngestError> {
        let key = cache::vehicle_telemetry_key(vehicle_id);
        match self.cache().get(&key) {
            Ok(Some(value)) => match serde_json::from_value::<BTreeMap<String, f64>>(value) {
                Ok(telemetry) => {
                    return Ok(TelemetrySnapshot {
                        vehicle_id,
                        source: ReadSource::Cache,
                        telemetry,
                    })
                }
                Err(e) => log::warn!("{} CACHE_DECODE_FAILED key={} error={}", ctx, key, e),
            },
            Ok(None) => log::debug!("{} CACHE_MISS key={}", ctx, key),
            Err(e) => log::warn!("{} CACHE_READ_FAILED key={} error={}", ctx, key, e),
        }

        let mut telemetry = BTreeMap::new();
        for row in self.store().latest_readings(vehicle_id)? {
            let processed = Conversion::for_sensor(&row.sensor)
                .apply(row.value, row.sensor.data_bytes)
                .unwrap_or(row.value);
            telemetry.insert(row.sensor.pid, processed);
        }

        if !telemetry.is_empty() {
            let written = cache::encode(&key, &telemetry)
                .and_then(|value| self.cache().put(&key, value, self.cache_ttl()));
            if let Err(e) = written {
                log::warn!("{} CACHE_WRITE_FAILED key={} error={}", ctx, key, e);
            }
        }

        Ok(TelemetrySnapshot {
            vehicle_id,
            source: ReadSource::Storage,
            telemetry,
        })
    }
}
