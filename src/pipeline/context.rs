//! Pipeline context management.
//!
//! Provides per-frame context for logging and outcome tracking.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::logging::structured::LogContext;

/// Transport a frame arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    Http,
    Mqtt,
    Direct,
}

impl FrameSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameSource::Http => "http",
            FrameSource::Mqtt => "mqtt",
            FrameSource::Direct => "direct",
        }
    }
}

impl fmt::Display for FrameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context for a single frame.
#[derive(Debug, Clone)]
pub struct FrameContext {
    pub frame_id: String,
    pub source: FrameSource,
    pub received_at: DateTime<Utc>,
}

impl FrameContext {
    pub fn new(source: FrameSource) -> Self {
        let frame_id = format!("frame-{}", &Uuid::new_v4().to_string()[..8]);
        Self {
            frame_id,
            source,
            received_at: Utc::now(),
        }
    }

    pub fn log_context(&self) -> LogContext {
        LogContext::new(&self.frame_id)
    }
}
