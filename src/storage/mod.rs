//! Storage module.
//!
//! Models, SQL text, the `TelemetryStore` trait and its SQLite backend.

pub mod models;
pub mod queries;
pub mod sqlite;
pub mod store;

pub use models::*;
pub use sqlite::{SqliteStore, DEFAULT_LOCK_TIMEOUT};
pub use store::{StoreError, TelemetryStore};
