//! Device timestamp reconciliation.
//!
//! Device clocks drift and firmware occasionally sends garbage. A reading is
//! stamped with the device time only when it parses and sits within
//! `MAX_CLOCK_DRIFT_SECS` of the server clock; otherwise the server time is
//! substituted so replay ordering stays sane.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Largest accepted distance between device and server clocks.
pub const MAX_CLOCK_DRIFT_SECS: i64 = 3600;

/// Naive layouts accepted besides RFC 3339. Interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Why a timestamp was (or was not) replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionReason {
    Valid,
    InvalidFormat,
    OutOfRange,
}

impl CorrectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionReason::Valid => "valid",
            CorrectionReason::InvalidFormat => "invalid_format",
            CorrectionReason::OutOfRange => "out_of_range",
        }
    }
}

impl fmt::Display for CorrectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of reconciling a device timestamp against the server clock.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledTimestamp {
    pub timestamp: DateTime<Utc>,
    pub was_corrected: bool,
    pub reason: CorrectionReason,
    /// Absolute drift in seconds when the device value parsed.
    pub drift_secs: Option<i64>,
}

/// Parse an ISO-ish device timestamp.
pub fn parse_device_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Validate a device timestamp, substituting `now` when it is unusable.
pub fn reconcile(device_timestamp: &str, now: DateTime<Utc>) -> ReconciledTimestamp {
    let parsed = match parse_device_timestamp(device_timestamp) {
        Some(ts) => ts,
        None => {
            return ReconciledTimestamp {
                timestamp: now,
                was_corrected: true,
                reason: CorrectionReason::InvalidFormat,
                drift_secs: None,
            }
        }
    };

    let delta = now - parsed;
    let limit = chrono::Duration::seconds(MAX_CLOCK_DRIFT_SECS);
    let drift = delta.num_seconds().abs();
    // num_seconds truncates, so bound the full duration
    if delta > limit || delta < -limit {
        return ReconciledTimestamp {
            timestamp: now,
            was_corrected: true,
            reason: CorrectionReason::OutOfRange,
            drift_secs: Some(drift),
        };
    }

    ReconciledTimestamp {
        timestamp: parsed,
        was_corrected: false,
        reason: CorrectionReason::Valid,
        drift_secs: Some(drift),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_recent_timestamp_passes_through() {
        let ts = now() - Duration::seconds(10);
        let result = reconcile(&ts.to_rfc3339(), now());
        assert_eq!(result.timestamp, ts);
        assert!(!result.was_corrected);
        assert_eq!(result.reason, CorrectionReason::Valid);
        assert_eq!(result.drift_secs, Some(10));
    }

    #[test]
    fn test_two_hours_old_is_out_of_range() {
        let ts = now() - Duration::hours(2);
        let result = reconcile(&ts.to_rfc3339(), now());
        assert_eq!(result.timestamp, now());
        assert!(result.was_corrected);
        assert_eq!(result.reason, CorrectionReason::OutOfRange);
        assert_eq!(result.drift_secs, Some(7200));
    }

    #[test]
    fn test_future_drift_is_out_of_range() {
        let ts = now() + Duration::seconds(MAX_CLOCK_DRIFT_SECS + 1);
        let result = reconcile(&ts.to_rfc3339(), now());
        assert_eq!(result.reason, CorrectionReason::OutOfRange);
    }

    #[test]
    fn test_drift_boundary_is_inclusive() {
        let ts = now() - Duration::seconds(MAX_CLOCK_DRIFT_SECS);
        let result = reconcile(&ts.to_rfc3339(), now());
        assert_eq!(result.reason, CorrectionReason::Valid);
        assert_eq!(result.timestamp, ts);
    }

    #[test]
    fn test_sub_second_excess_is_out_of_range() {
        let past = now() - Duration::seconds(MAX_CLOCK_DRIFT_SECS) - Duration::milliseconds(900);
        let result = reconcile(&past.to_rfc3339(), now());
        assert_eq!(result.reason, CorrectionReason::OutOfRange);
        assert_eq!(result.timestamp, now());

        let future = now() + Duration::seconds(MAX_CLOCK_DRIFT_SECS) + Duration::milliseconds(1);
        assert!(reconcile(&future.to_rfc3339(), now()).was_corrected);
    }

    #[test]
    fn test_invalid_format() {
        for raw in ["", "yesterday", "2024-13-45 99:99:99", "1700000000"] {
            let result = reconcile(raw, now());
            assert_eq!(result.reason, CorrectionReason::InvalidFormat, "raw={raw}");
            assert_eq!(result.timestamp, now());
            assert!(result.was_corrected);
        }
    }

    #[test]
    fn test_naive_formats_are_utc() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 11, 59, 30).unwrap();
        for raw in [
            "2024-01-01 11:59:30",
            "2024-01-01T11:59:30",
            "2024-01-01T11:59:30Z",
            "2024-01-01T13:59:30+02:00",
        ] {
            assert_eq!(parse_device_timestamp(raw), Some(expected), "raw={raw}");
        }
        assert!(parse_device_timestamp("2024-01-01 11:59:30.250").is_some());
    }

    proptest! {
        #[test]
        fn prop_within_tolerance_is_unchanged(offset in -MAX_CLOCK_DRIFT_SECS..=MAX_CLOCK_DRIFT_SECS) {
            let ts = now() + Duration::seconds(offset);
            let result = reconcile(&ts.to_rfc3339(), now());
            prop_assert_eq!(result.timestamp, ts);
            prop_assert!(!result.was_corrected);
        }
    }
}
