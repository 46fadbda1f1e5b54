//! Raw-to-engineering value conversion for a bound sensor.

use crate::formula::{EvaluationError, Formula};
use crate::storage::Sensor;

/// How a sensor's raw value becomes its processed value.
///
/// Formulas are parsed once when the binding set is loaded, not per reading.
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    PassThrough,
    Formula(Formula),
    /// The catalog formula does not parse; every reading falls back to raw.
    Invalid {
        formula: String,
        error: EvaluationError,
    },
}

impl Conversion {
    pub fn for_sensor(sensor: &Sensor) -> Self {
        if !sensor.requires_calculation {
            return Conversion::PassThrough;
        }
        match sensor.calculation_formula.as_deref().map(str::trim) {
            None | Some("") => Conversion::PassThrough,
            Some(source) => match Formula::parse(source) {
                Ok(formula) => Conversion::Formula(formula),
                Err(error) => Conversion::Invalid {
                    formula: source.to_string(),
                    error,
                },
            },
        }
    }

    /// Processed value for `raw`, or the reason the caller must fall back.
    pub fn apply(&self, raw: f64, data_bytes: u8) -> Result<f64, EvaluationError> {
        match self {
            Conversion::PassThrough => Ok(raw),
            Conversion::Formula(formula) => {
                let (a, b) = raw_operands(raw, data_bytes);
                formula.evaluate(a, b)
            }
            Conversion::Invalid { error, .. } => Err(error.clone()),
        }
    }
}

/// Split a device raw value into formula operands.
///
/// Devices report multi-byte PIDs as one integer. For sensors with two or
/// more data bytes, a non-negative integer below 65536 is split into its
/// high byte (A) and low byte (B). Anything else is A with B = 0.
pub fn raw_operands(raw: f64, data_bytes: u8) -> (f64, f64) {
    if data_bytes >= 2 && raw >= 0.0 && raw.fract() == 0.0 && raw < 65536.0 {
        ((raw / 256.0).floor(), raw % 256.0)
    } else {
        (raw, 0.0)
    }
}
