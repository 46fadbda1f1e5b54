//! Process configuration: command line flags with environment fallbacks.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::ingress::MqttSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    Production,
    Development,
}

/// Fleet telemetry ingestion server
#[derive(Parser, Debug, Clone)]
#[command(name = "obdstream")]
#[command(about = "Ingests OBD2/CAN telemetry frames over MQTT and HTTP")]
#[command(version)]
pub struct Config {
    /// SQLite database file
    #[arg(long, env = "OBDSTREAM_DB_PATH", default_value = "obdstream.db")]
    pub db_path: PathBuf,

    /// How long a store call waits for the connection, in milliseconds
    #[arg(long, env = "OBDSTREAM_DB_TIMEOUT_MS", default_value_t = 5000)]
    pub db_timeout_ms: u64,

    /// HTTP bind address
    #[arg(long, env = "OBDSTREAM_HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: SocketAddr,

    #[arg(long, env = "OBDSTREAM_ENV", value_enum, default_value = "production")]
    pub environment: Environment,

    /// Ingestion workers
    #[arg(long, env = "OBDSTREAM_WORKERS", default_value_t = 4)]
    pub workers: usize,

    #[arg(long, env = "OBDSTREAM_QUEUE_CAPACITY", default_value_t = 1024)]
    pub queue_capacity: usize,

    /// Lifetime of cached telemetry, DTC and device entries
    #[arg(long, env = "OBDSTREAM_CACHE_TTL_SECS", default_value_t = 300)]
    pub cache_ttl_secs: u64,

    /// Prefix for cache keys
    #[arg(long, env = "OBDSTREAM_CACHE_NAMESPACE", default_value = "")]
    pub cache_namespace: String,

    /// Lifetime of a vehicle's loaded sensor bindings
    #[arg(long, env = "OBDSTREAM_CATALOG_TTL_SECS", default_value_t = 60)]
    pub catalog_ttl_secs: u64,

    /// Seconds between evictions of expired cache, catalog and channel state
    #[arg(long, env = "OBDSTREAM_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "OBDSTREAM_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "MQTT_HOST", default_value = "127.0.0.1")]
    pub mqtt_host: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    #[arg(long, env = "MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "obdstream")]
    pub mqtt_client_id: String,

    #[arg(long, env = "MQTT_TOPIC", default_value = "vehicles/telemetry")]
    pub mqtt_topic: String,

    /// Keep-alive interval in seconds
    #[arg(long, env = "MQTT_KEEPALIVE", default_value_t = 60)]
    pub mqtt_keepalive: u64,

    /// Serve HTTP only
    #[arg(long)]
    pub no_mqtt: bool,

    /// Load the standard OBD2 sensor catalog at startup
    #[arg(long)]
    pub seed_catalog: bool,
}

impl Config {
    pub fn production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Unknown levels fall back to info.
    pub fn log_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }

    pub fn db_timeout(&self) -> Duration {
        Duration::from_millis(self.db_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn mqtt(&self) -> MqttSettings {
        MqttSettings {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            client_id: self.mqtt_client_id.clone(),
            username: self.mqtt_username.clone().filter(|u| !u.is_empty()),
            password: self.mqtt_password.clone(),
            topic: self.mqtt_topic.clone(),
            keep_alive: Duration::from_secs(self.mqtt_keepalive),
            ..MqttSettings::default()
        }
    }
}
