//! Worker pool draining the ingestion queue.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::{IngestJob, JobReceiver, QueueStats, QUEUE_NAME};
use crate::pipeline::{FrameContext, IngestOutcome, Ingestor};
use crate::validation::Frame;

/// Attempts per job when ingestion panics. Ordinary failures are final.
pub const MAX_ATTEMPTS: u32 = 3;

/// Anything that can consume a frame on a blocking thread.
pub trait FrameSink: Send + Sync + 'static {
    fn ingest(&self, frame: &Frame, ctx: &FrameContext) -> Option<IngestOutcome>;
}

impl FrameSink for Ingestor {
    fn ingest(&self, frame: &Frame, ctx: &FrameContext) -> Option<IngestOutcome> {
        Ingestor::ingest(self, frame, ctx)
    }
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker. Returns once all queue handles are dropped and
    /// the backlog is drained.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                log::error!("WORKER_EXITED_ABNORMALLY queue={} error={}", QUEUE_NAME, e);
            }
        }
    }
}

/// Start `workers` consumers on the current tokio runtime.
pub fn spawn_workers<S: FrameSink>(receiver: JobReceiver, sink: Arc<S>, workers: usize) -> WorkerPool {
    let JobReceiver { rx, stats } = receiver;
    let rx = Arc::new(Mutex::new(rx));
    let workers = workers.max(1);

    let handles = (0..workers)
        .map(|worker_id| {
            let rx = Arc::clone(&rx);
            let sink = Arc::clone(&sink);
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                log::debug!("WORKER_STARTED queue={} worker={}", QUEUE_NAME, worker_id);
                while let Some(job) = next_job(&rx).await {
                    run_job(worker_id, &sink, &stats, job).await;
                }
                log::debug!("WORKER_STOPPED queue={} worker={}", QUEUE_NAME, worker_id);
            })
        })
        .collect();

    log::info!("QUEUE_STARTED queue={} workers={}", QUEUE_NAME, workers);
    WorkerPool { handles }
}

async fn next_job(rx: &Mutex<mpsc::Receiver<IngestJob>>) -> Option<IngestJob> {
    rx.lock().await.recv().await
}

async fn run_job<S: FrameSink>(worker_id: usize, sink: &Arc<S>, stats: &QueueStats, job: IngestJob) {
    let log_ctx = job
        .ctx
        .log_context()
        .with_device(&job.frame.device_serial)
        .with_vehicle(&job.frame.vehicle_vin);
    log::debug!(
        "{} JOB_STARTED worker={} waited_ms={}",
        log_ctx,
        worker_id,
        job.enqueued_at.elapsed().as_millis()
    );

    let mut attempt = 0;
    loop {
        attempt += 1;
        let sink = Arc::clone(sink);
        let frame = job.frame.clone();
        let ctx = job.ctx.clone();
        let result = tokio::task::spawn_blocking(move || sink.ingest(&frame, &ctx)).await;

        match result {
            Ok(Some(outcome)) => {
                QueueStats::bump(&stats.processed);
                log::debug!(
                    "{} JOB_DONE worker={} attempt={} registers={}",
                    log_ctx,
                    worker_id,
                    attempt,
                    outcome.registers_written
                );
                return;
            }
            Ok(None) => {
                // already logged by the sink
                QueueStats::bump(&stats.failed);
                return;
            }
            Err(e) if e.is_panic() && attempt < MAX_ATTEMPTS => {
                QueueStats::bump(&stats.retried);
                log::warn!(
                    "{} JOB_PANICKED worker={} attempt={} max_attempts={} retrying=true",
                    log_ctx,
                    worker_id,
                    attempt,
                    MAX_ATTEMPTS
                );
            }
            Err(e) => {
                QueueStats::bump(&stats.abandoned);
                log::error!(
                    "{} JOB_ABANDONED worker={} attempt={} error={}",
                    log_ctx,
                    worker_id,
                    attempt,
                    e
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FrameSource;
    use crate::queue::channel;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn frame(vin: &str) -> Frame {
        Frame::from_value(&json!({"id": "DEV1", "idc": vin, "dt": "2024-01-01T00:00:00Z", "s": {}}))
            .unwrap()
    }

    fn outcome() -> IngestOutcome {
        IngestOutcome {
            frame_id: "frame-test".into(),
            vehicle_id: 1,
            device_id: 1,
            timestamp: chrono::Utc::now(),
            timestamp_corrected: false,
            debug: false,
            readings_decoded: 0,
            registers_written: 0,
            unmapped: Vec::new(),
            dropped: Vec::new(),
            formula_fallbacks: 0,
            dtc_count: 0,
        }
    }

    /// Panics until `panics` attempts have been made, counts every call.
    struct FlakySink {
        calls: AtomicU32,
        panics: u32,
    }

    impl FrameSink for FlakySink {
        fn ingest(&self, frame: &Frame, _ctx: &FrameContext) -> Option<IngestOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.panics {
                panic!("boom");
            }
            (frame.vehicle_vin != "REJECT").then(outcome)
        }
    }

    fn flaky(panics: u32) -> Arc<FlakySink> {
        Arc::new(FlakySink {
            calls: AtomicU32::new(0),
            panics,
        })
    }

    #[tokio::test]
    async fn test_workers_drain_and_stop() {
        let (handle, rx) = channel(16);
        let sink = flaky(0);
        let pool = spawn_workers(rx, Arc::clone(&sink), 3);
        assert_eq!(pool.len(), 3);

        for _ in 0..5 {
            handle.try_enqueue(frame("VIN1"), FrameContext::new(FrameSource::Mqtt)).unwrap();
        }
        handle.try_enqueue(frame("REJECT"), FrameContext::new(FrameSource::Mqtt)).unwrap();

        assert_eq!(handle.stats().enqueued, 6);
        drop(handle);

        pool.join().await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_panic_retries_then_succeeds() {
        let (handle, rx) = channel(4);
        let sink = flaky(2);
        let stats = Arc::clone(&rx.stats);
        let pool = spawn_workers(rx, Arc::clone(&sink), 1);

        handle.try_enqueue(frame("VIN1"), FrameContext::new(FrameSource::Http)).unwrap();
        drop(handle);
        pool.join().await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.retried, 2);
        assert_eq!(snapshot.processed, 1);
        assert_eq!(snapshot.abandoned, 0);
    }

    #[tokio::test]
    async fn test_panic_abandoned_after_max_attempts() {
        let (handle, rx) = channel(4);
        let sink = flaky(u32::MAX);
        let stats = Arc::clone(&rx.stats);
        let pool = spawn_workers(rx, Arc::clone(&sink), 1);

        handle.try_enqueue(frame("VIN1"), FrameContext::new(FrameSource::Http)).unwrap();
        drop(handle);
        pool.join().await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.abandoned, 1);
        assert_eq!(snapshot.processed, 0);
    }

    #[tokio::test]
    async fn test_ordinary_failure_not_retried() {
        let (handle, rx) = channel(4);
        let sink = flaky(0);
        let stats = Arc::clone(&rx.stats);
        let pool = spawn_workers(rx, Arc::clone(&sink), 2);

        handle.try_enqueue(frame("REJECT"), FrameContext::new(FrameSource::Mqtt)).unwrap();
        drop(handle);
        pool.join().await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshot().failed, 1);
    }
}
