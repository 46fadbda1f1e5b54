//! DTC description and severity, derived from the code alone.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
    Unknown,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description from the two-character prefix.
pub fn describe(code: &str) -> &'static str {
    match code.get(..2) {
        Some("P0") => "Powertrain Issue",
        Some("P1") => "Manufacturer-Specific Powertrain",
        Some("P2") => "Fuel/Air Monitoring Issue",
        Some("P3") => "Ignition Issue",
        Some("B0") => "Body Issue",
        Some("C0") => "Chassis Issue",
        Some("U0") => "Network Issue",
        _ => "Unknown Issue",
    }
}

/// Severity from the system letter.
pub fn severity(code: &str) -> Severity {
    match code.chars().next() {
        Some('P') => Severity::High,
        Some('B') | Some('C') => Severity::Medium,
        Some('U') => Severity::Low,
        _ => Severity::Unknown,
    }
}

/// A DTC as carried in realtime events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtcSummary {
    pub code: String,
    pub description: String,
    pub severity: Severity,
}

impl DtcSummary {
    pub fn for_code(code: &str) -> Self {
        Self {
            code: code.to_string(),
            description: describe(code).to_string(),
            severity: severity(code),
        }
    }
}

/// A DTC as held in the `vehicle_dtc_{id}` cache entry and returned by
/// the active-DTC read path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveDtc {
    pub code: String,
    pub description: String,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
}

impl ActiveDtc {
    pub fn new(code: &str, detected_at: DateTime<Utc>) -> Self {
        Self {
            code: code.to_string(),
            description: describe(code).to_string(),
            severity: severity(code),
            detected_at,
        }
    }
}
