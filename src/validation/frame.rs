//! Inbound frame shape validation.
//!
//! Frames arrive as JSON from MQTT or HTTP:
//!
//! ```text
//! { "id": serial, "idc": vin, "dt": timestamp,
//!   "s": { pid: { "v": number } }, "DTC": [code], "d": bool }
//! ```
//!
//! Validation only checks shape. Whether the device and vehicle exist is
//! decided later by the pipeline. A wrong container shape rejects the frame;
//! a single malformed sensor key or DTC entry is dropped and recorded in
//! [`Frame::dropped`] so the rest of the frame is still stored.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

/// Readings accepted per frame.
pub const MAX_READINGS_PER_FRAME: usize = 512;
/// DTC codes accepted per frame.
pub const MAX_DTC_PER_FRAME: usize = 64;
/// Longest PID / mapping key.
pub const MAX_PID_LEN: usize = 64;
/// Longest device serial or VIN.
pub const MAX_IDENTIFIER_LEN: usize = 128;
/// Longest DTC code (column width).
pub const MAX_DTC_LEN: usize = 10;

lazy_static! {
    /// PID / mapping keys: "0x0C", "engine_temp", "can_1F4_byte0", "lat"
    static ref PID_KEY_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_.:\-]+$").unwrap();

    /// DTC codes are alphanumeric ("P0420", "U0100", manufacturer variants)
    static ref DTC_PATTERN: Regex = Regex::new(r"^[A-Z0-9]+$").unwrap();
}

/// Field name -> human readable problems, rendered as the 422 body.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Frame rejected before any side effect.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(String),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("frame failed validation on fields {:?}", .0.keys().collect::<Vec<_>>())]
    Invalid(FieldErrors),
}

impl FrameError {
    pub fn field_errors(&self) -> FieldErrors {
        match self {
            FrameError::Invalid(errors) => errors.clone(),
            FrameError::Malformed(msg) => {
                BTreeMap::from([("payload".to_string(), vec![msg.clone()])])
            }
            FrameError::NotAnObject => BTreeMap::from([(
                "payload".to_string(),
                vec!["The payload must be a JSON object.".to_string()],
            )]),
        }
    }
}

/// One sensor reading as reported by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub pid: String,
    /// `None` when the device sent `null`, nothing, or a non-numeric value.
    pub raw_value: Option<f64>,
}

/// A decoded telemetry frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub device_serial: String,
    pub vehicle_vin: String,
    pub device_timestamp: String,
    pub readings: Vec<Reading>,
    pub dtc_codes: Vec<String>,
    /// Process and broadcast, but do not write to storage.
    pub debug: bool,
    /// Entries skipped during validation, as `s.<key>` or `DTC.<index>`.
    pub dropped: Vec<String>,
}

impl Frame {
    /// Decode and validate a raw payload.
    pub fn from_slice(payload: &[u8]) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_slice(payload).map_err(|e| FrameError::Malformed(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Validate an already-decoded JSON value.
    pub fn from_value(value: &Value) -> Result<Self, FrameError> {
        let obj = value.as_object().ok_or(FrameError::NotAnObject)?;
        let mut errors = FieldErrors::new();
        let mut dropped = Vec::new();

        let device_serial = required_identifier(obj, "id", &mut errors);
        let vehicle_vin = required_identifier(obj, "idc", &mut errors);
        let device_timestamp = match obj.get("dt") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(Value::String(_)) | Some(Value::Null) | None => {
                push(&mut errors, "dt", "The dt field is required.");
                String::new()
            }
            Some(_) => {
                push(&mut errors, "dt", "The dt field must be a string.");
                String::new()
            }
        };

        let readings = parse_readings(obj.get("s"), &mut errors, &mut dropped);
        let dtc_codes = parse_dtc_codes(obj.get("DTC"), &mut errors, &mut dropped);
        let debug = match obj.get("d") {
            None | Some(Value::Null) => false,
            Some(v) => match coerce_bool(v) {
                Some(b) => b,
                None => {
                    push(&mut errors, "d", "The d field must be true or false.");
                    false
                }
            },
        };

        if !errors.is_empty() {
            return Err(FrameError::Invalid(errors));
        }

        Ok(Self {
            device_serial,
            vehicle_vin,
            device_timestamp,
            readings,
            dtc_codes,
            debug,
            dropped,
        })
    }

    /// Readings carrying a usable numeric value.
    pub fn numeric_readings(&self) -> impl Iterator<Item = (&str, f64)> {
        self.readings
            .iter()
            .filter_map(|r| r.raw_value.map(|v| (r.pid.as_str(), v)))
    }
}

fn push(errors: &mut FieldErrors, field: &str, message: &str) {
    errors
        .entry(field.to_string())
        .or_default()
        .push(message.to_string());
}

fn required_identifier(obj: &Map<String, Value>, field: &str, errors: &mut FieldErrors) -> String {
    match obj.get(field) {
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                push(errors, field, &format!("The {} field is required.", field));
            } else if s.len() > MAX_IDENTIFIER_LEN {
                push(
                    errors,
                    field,
                    &format!("The {} field must not exceed {} characters.", field, MAX_IDENTIFIER_LEN),
                );
            }
            s.to_string()
        }
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Null) | None => {
            push(errors, field, &format!("The {} field is required.", field));
            String::new()
        }
        Some(_) => {
            push(errors, field, &format!("The {} field must be a string.", field));
            String::new()
        }
    }
}

fn parse_readings(
    value: Option<&Value>,
    errors: &mut FieldErrors,
    dropped: &mut Vec<String>,
) -> Vec<Reading> {
    let map = match value {
        Some(Value::Object(map)) => map,
        // some clients serialize an empty map as []
        Some(Value::Array(arr)) if arr.is_empty() => return Vec::new(),
        Some(Value::Null) | None => {
            push(errors, "s", "The s field is required.");
            return Vec::new();
        }
        Some(_) => {
            push(errors, "s", "The s field must be an object.");
            return Vec::new();
        }
    };

    if map.len() > MAX_READINGS_PER_FRAME {
        push(
            errors,
            "s",
            &format!("The s field must not have more than {} readings.", MAX_READINGS_PER_FRAME),
        );
        return Vec::new();
    }

    let mut readings = Vec::with_capacity(map.len());
    for (pid, entry) in map {
        if pid.len() > MAX_PID_LEN || !PID_KEY_PATTERN.is_match(pid) {
            dropped.push(format!("s.{}", pid));
            continue;
        }

        let raw_value = match entry {
            Value::Object(reading) => reading.get("v").and_then(numeric_value),
            _ => None,
        };

        readings.push(Reading {
            pid: pid.clone(),
            raw_value,
        });
    }
    readings
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn parse_dtc_codes(
    value: Option<&Value>,
    errors: &mut FieldErrors,
    dropped: &mut Vec<String>,
) -> Vec<String> {
    let items = match value {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(items)) => items,
        Some(_) => {
            push(errors, "DTC", "The DTC field must be an array.");
            return Vec::new();
        }
    };

    if items.len() > MAX_DTC_PER_FRAME {
        push(
            errors,
            "DTC",
            &format!("The DTC field must not have more than {} items.", MAX_DTC_PER_FRAME),
        );
        return Vec::new();
    }

    let mut codes: Vec<String> = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let code = match item.as_str() {
            Some(s) => s.trim().to_ascii_uppercase(),
            None => {
                dropped.push(format!("DTC.{}", idx));
                continue;
            }
        };
        if code.is_empty() || code.len() > MAX_DTC_LEN || !DTC_PATTERN.is_match(&code) {
            dropped.push(format!("DTC.{}", idx));
            continue;
        }
        if !codes.contains(&code) {
            codes.push(code);
        }
    }
    codes
}

/// Loose boolean coercion matching what device firmware actually sends.
pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
