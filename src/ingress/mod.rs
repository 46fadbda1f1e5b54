//! Transport adapters.
//!
//! Both adapters validate a frame's shape and enqueue it; neither runs the
//! pipeline itself.

pub mod http;
pub mod mqtt;

pub use http::{router, ApiError, AppState, DEFAULT_ENQUEUE_TIMEOUT};
pub use mqtt::{handle_payload, MqttSettings, PayloadOutcome};
