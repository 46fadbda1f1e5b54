//! Sensor calibration formulas.
//!
//! Converts a raw OBD2 reading into a physical value using the formula
//! stored on the sensor catalog row. The language is deliberately tiny:
//! - Variables `A` and `B` (raw data bytes)
//! - Integer and decimal literals
//! - `+ - * /`, unary minus, parentheses
//!
//! Nothing else parses. There are no function calls, no assignment and no
//! way to reach outside the two bound variables.

pub mod parser;

pub use parser::*;
