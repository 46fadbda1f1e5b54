//! Read cache.
//!
//! Volatile, non-authoritative views of recent telemetry, active DTCs and
//! device lookups. Every reader has a fallback to durable storage, so a
//! miss is never an error.

pub mod memory;

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryCache;

/// TTL for every entry written by the pipeline.
pub const CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("timed out after {0:?} waiting for the cache")]
    Timeout(Duration),

    #[error("cache value for '{key}' could not be encoded: {message}")]
    Encoding { key: String, message: String },
}

/// Key-value cache with per-entry expiry.
pub trait ReadCache: Send + Sync {
    fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    /// `Ok(None)` on a miss or an expired entry.
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    fn forget(&self, key: &str) -> Result<(), CacheError>;
}

/// Where a read path found its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadSource {
    Cache,
    Storage,
}

/// Encode a value for `put`.
pub fn encode<T: serde::Serialize>(key: &str, value: &T) -> Result<Value, CacheError> {
    serde_json::to_value(value).map_err(|e| CacheError::Encoding {
        key: key.to_string(),
        message: e.to_string(),
    })
}

pub fn vehicle_telemetry_key(vehicle_id: i64) -> String {
    format!("vehicle_telemetry_{}", vehicle_id)
}

pub fn vehicle_dtc_key(vehicle_id: i64) -> String {
    format!("vehicle_dtc_{}", vehicle_id)
}

pub fn client_device_key(serial: &str) -> String {
    format!("client_device_with_vehicles_{}", serial)
}
