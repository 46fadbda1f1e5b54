//! Bounded ingestion queue.
//!
//! Ingress adapters hand frames to a tokio mpsc channel; a pool of workers
//! runs ingestion on the blocking thread pool. The queue is in-memory:
//! jobs still queued at shutdown are drained, jobs in a crashed process are
//! lost.

pub mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::pipeline::FrameContext;
use crate::validation::Frame;

pub use worker::{spawn_workers, FrameSink, WorkerPool, MAX_ATTEMPTS};

pub const QUEUE_NAME: &str = "telemetry";
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// One queued frame.
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub frame: Frame,
    pub ctx: FrameContext,
    pub enqueued_at: Instant,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("queue '{0}' is full")]
    Full(&'static str),

    #[error("queue '{0}' is closed")]
    Closed(&'static str),

    #[error("timed out after {1:?} waiting for room on queue '{0}'")]
    Timeout(&'static str, Duration),
}

#[derive(Debug, Default)]
pub struct QueueStats {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    abandoned: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatsSnapshot {
    pub enqueued: u64,
    pub rejected: u64,
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
    pub abandoned: u64,
}

impl QueueStats {
    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Producer side, cheap to clone. Workers exit once every handle is dropped
/// and the queue is drained.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<IngestJob>,
    stats: Arc<QueueStats>,
    capacity: usize,
}

/// Consumer side, handed to `spawn_workers`.
pub struct JobReceiver {
    rx: mpsc::Receiver<IngestJob>,
    stats: Arc<QueueStats>,
}

pub fn channel(capacity: usize) -> (QueueHandle, JobReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let stats = Arc::new(QueueStats::default());
    (
        QueueHandle {
            tx,
            stats: Arc::clone(&stats),
            capacity,
        },
        JobReceiver { rx, stats },
    )
}

impl QueueHandle {
    fn job(frame: Frame, ctx: FrameContext) -> IngestJob {
        IngestJob {
            frame,
            ctx,
            enqueued_at: Instant::now(),
        }
    }

    /// Enqueue without waiting. Used by the MQTT loop, which must not stall.
    pub fn try_enqueue(&self, frame: Frame, ctx: FrameContext) -> Result<(), EnqueueError> {
        match self.tx.try_send(Self::job(frame, ctx)) {
            Ok(()) => {
                QueueStats::bump(&self.stats.enqueued);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                QueueStats::bump(&self.stats.rejected);
                Err(EnqueueError::Full(QUEUE_NAME))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EnqueueError::Closed(QUEUE_NAME)),
        }
    }

    /// Enqueue, waiting at most `timeout` for room.
    pub async fn enqueue_timeout(
        &self,
        frame: Frame,
        ctx: FrameContext,
        timeout: Duration,
    ) -> Result<(), EnqueueError> {
        match self.tx.send_timeout(Self::job(frame, ctx), timeout).await {
            Ok(()) => {
                QueueStats::bump(&self.stats.enqueued);
                Ok(())
            }
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                QueueStats::bump(&self.stats.rejected);
                Err(EnqueueError::Timeout(QUEUE_NAME, timeout))
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(EnqueueError::Closed(QUEUE_NAME)),
        }
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        self.stats.snapshot()
    }

    /// Jobs currently waiting.
    pub fn depth(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
