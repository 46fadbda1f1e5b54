//! Diagnostic trouble codes.

pub mod dtc;
pub mod tracker;

pub use dtc::{describe, severity, ActiveDtc, DtcSummary, Severity};
pub use tracker::DtcTracker;
