//! Sensor catalog.
//!
//! Resolves frame keys to vehicle sensor bindings and converts raw values
//! with each sensor's calibration formula.

pub mod conversion;
pub mod resolver;
pub mod standard;

pub use conversion::{raw_operands, Conversion};
pub use resolver::{BindingSet, ResolvedBinding, SensorCatalog, DEFAULT_CATALOG_TTL};
pub use standard::standard_sensors;
