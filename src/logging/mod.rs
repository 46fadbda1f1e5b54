//! Structured logging with frame context.
//!
//! Every pipeline log line carries the frame id plus, once resolved, the
//! device serial and vehicle VIN for easy correlation.

pub mod structured;

pub use structured::*;
