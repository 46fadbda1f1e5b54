//! obdstream - fleet telemetry ingestion server
//!
//! ```bash
//! # HTTP on 0.0.0.0:8080, MQTT from the local broker
//! obdstream --db-path fleet.db --seed-catalog
//!
//! # HTTP only, verbose
//! OBDSTREAM_ENV=development obdstream --no-mqtt --log-level debug
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use obdstream_core::cache::MemoryCache;
use obdstream_core::catalog::{standard_sensors, SensorCatalog};
use obdstream_core::config::Config;
use obdstream_core::ingress::{self, AppState};
use obdstream_core::logging::init_logger;
use obdstream_core::pipeline::{Ingestor, Sweeper};
use obdstream_core::queue;
use obdstream_core::realtime::{BroadcastHub, DEFAULT_CHANNEL_CAPACITY};
use obdstream_core::storage::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_logger(config.log_filter());

    let db_path = config.db_path.to_string_lossy().into_owned();
    let store = Arc::new(
        SqliteStore::new(&db_path, config.db_timeout())
            .with_context(|| format!("opening database {}", db_path))?,
    );
    if config.seed_catalog {
        let seeded = store
            .seed_sensors(&standard_sensors())
            .context("seeding sensor catalog")?;
        log::info!("CATALOG_SEEDED sensors={}", seeded);
    }

    let cache = Arc::new(MemoryCache::new(&config.cache_namespace));
    let hub = Arc::new(BroadcastHub::new(DEFAULT_CHANNEL_CAPACITY));
    let catalog = Arc::new(SensorCatalog::new(config.catalog_ttl()));
    let ingestor = Arc::new(Ingestor::new(
        store,
        cache.clone(),
        hub.clone(),
        Arc::clone(&catalog),
        config.cache_ttl(),
    ));

    let (queue_handle, receiver) = queue::channel(config.queue_capacity);
    let pool = queue::spawn_workers(receiver, Arc::clone(&ingestor), config.workers);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_task = tokio::spawn(
        Sweeper::new(cache, catalog, hub).run(config.sweep_interval(), shutdown_rx.clone()),
    );
    let mqtt_task = if config.no_mqtt {
        log::info!("MQTT_DISABLED");
        None
    } else {
        Some(tokio::spawn(ingress::mqtt::run(
            config.mqtt(),
            queue_handle.clone(),
            shutdown_rx.clone(),
        )))
    };

    let state = Arc::new(AppState::new(
        Arc::clone(&ingestor),
        queue_handle,
        config.production(),
    ));
    let app = ingress::router(state);

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("binding {}", config.http_addr))?;
    log::info!(
        "OBDSTREAM_STARTED version={} http={} environment={:?} workers={}",
        env!("CARGO_PKG_VERSION"),
        config.http_addr,
        config.environment,
        pool.len()
    );

    let mut http_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = http_shutdown.changed() => {}
            }
        })
        .await
        .context("HTTP server error")?;

    log::info!("OBDSTREAM_STOPPING");
    let _ = shutdown_tx.send(true);
    if let Some(task) = mqtt_task {
        if let Err(e) = task.await {
            log::error!("MQTT_TASK_FAILED error={}", e);
        }
    }

    if let Err(e) = sweeper_task.await {
        log::error!("SWEEPER_TASK_FAILED error={}", e);
    }

    // every queue handle is gone now; workers drain the backlog and exit
    pool.join().await;
    log::info!("OBDSTREAM_STOPPED");
    Ok(())
}
