//! Obdstream Core - telemetry ingestion pipeline for OBD2/CAN fleet devices
//!
//! Devices publish frames of sensor readings and diagnostic trouble codes
//! over MQTT or HTTP. Each frame is resolved against the vehicle's sensor
//! catalog, decoded with the sensor's calibration formula, persisted,
//! cached for dashboards and published to realtime subscribers.
//!
//! ## Architecture
//!
//! - `ingress` - MQTT subscriber and HTTP endpoints, both feed the queue
//! - `queue` - Bounded work queue and blocking worker pool
//! - `pipeline` - Frame orchestration, telemetry snapshot, trip replay
//! - `validation` - Frame shape checks and device timestamp reconciliation
//! - `catalog` - Per-vehicle sensor bindings and value conversion
//! - `formula` - Calibration formula parser and evaluator
//! - `diagnostics` - DTC descriptions, severity and lifecycle
//! - `storage` - `TelemetryStore` trait and the SQLite implementation
//! - `cache` - TTL read cache for dashboard views
//! - `realtime` - Per-vehicle and per-device broadcast channels
//! - `logging` - Structured logging with frame context

pub mod cache;
pub mod catalog;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod formula;
pub mod ingress;
pub mod logging;
pub mod pipeline;
pub mod queue;
pub mod realtime;
pub mod storage;
pub mod validation;

pub use error::IngestError;
pub use pipeline::{FrameContext, FrameSource, IngestOutcome, Ingestor};
pub use validation::Frame;
