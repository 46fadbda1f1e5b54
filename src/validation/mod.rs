//! Frame validation module.
//!
//! Everything that can be decided about a frame without I/O:
//! - Shape validation of the inbound JSON (field errors for 422 responses)
//! - Device timestamp reconciliation against the server clock

pub mod frame;
pub mod timestamp;

pub use frame::*;
pub use timestamp::*;
