//! Pipeline orchestration module.
//!
//! Frame ingestion plus the read paths built on the same store and cache:
//! - Ingestion (resolve, decode, persist, publish, cache)
//! - Latest-telemetry snapshot with storage fallback
//! - Trip replay from the register log
//! - Periodic eviction of cache, catalog and channel state

pub mod context;
pub mod ingestion;
pub mod maintenance;
pub mod replay;
pub mod status;

pub use context::*;
pub use ingestion::*;
pub use maintenance::{SweepReport, Sweeper, DEFAULT_SWEEP_INTERVAL};
pub use replay::{build_replay, Replay, ReplayError};
pub use status::TelemetrySnapshot;
