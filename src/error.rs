//! Pipeline error taxonomy.

use thiserror::Error;

use crate::cache::CacheError;
use crate::storage::StoreError;
use crate::validation::FrameError;

/// Why a frame was rejected or abandoned.
///
/// Evaluation errors, timestamp anomalies and publish failures never appear
/// here: all are recovered inside the pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid frame: {0}")]
    Validation(#[from] FrameError),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("cache failure: {0}")]
    Cache(#[from] CacheError),
}

impl IngestError {
    pub fn not_found(entity: &'static str, key: &str) -> Self {
        IngestError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Short label for logs and outcome reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Validation(_) => "validation",
            IngestError::NotFound { .. } => "not_found",
            IngestError::Persistence(_) => "persistence",
            IngestError::Cache(_) => "cache",
        }
    }
}
