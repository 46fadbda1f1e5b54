//! Periodic eviction of in-process state.
//!
//! The read cache, the catalog's binding sets and the broadcast channels all
//! grow with the number of vehicles seen. A sweeper task trims each of them on
//! a fixed interval until shutdown.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::cache::MemoryCache;
use crate::catalog::SensorCatalog;
use crate::realtime::BroadcastHub;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Entries removed by one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub cache_entries: usize,
    pub catalog_sets: usize,
    pub channels: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.cache_entries + self.catalog_sets + self.channels
    }
}

pub struct Sweeper {
    cache: Arc<MemoryCache>,
    catalog: Arc<SensorCatalog>,
    hub: Arc<BroadcastHub>,
}

impl Sweeper {
    pub fn new(cache: Arc<MemoryCache>, catalog: Arc<SensorCatalog>, hub: Arc<BroadcastHub>) -> Self {
        Self {
            cache,
            catalog,
            hub,
        }
    }

    pub fn sweep(&self) -> SweepReport {
        let cache_entries = match self.cache.purge_expired() {
            Ok(purged) => purged,
            Err(e) => {
                // lock contention; the next tick retries
                log::warn!("SWEEP_CACHE_FAILED error={}", e);
                0
            }
        };
        SweepReport {
            cache_entries,
            catalog_sets: self.catalog.purge_expired(),
            channels: self.hub.prune(),
        }
    }

    /// Sweep every `every` until `shutdown` flips to true or its sender drops.
    pub async fn run(self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let report = self.sweep();
                    if report.total() > 0 {
                        log::debug!(
                            "SWEEP_DONE cache_entries={} catalog_sets={} channels={}",
                            report.cache_entries,
                            report.catalog_sets,
                            report.channels
                        );
                    }
                }
            }
        }
        log::debug!("SWEEPER_STOPPED");
    }
}
