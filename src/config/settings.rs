//! Application settings and configuration structures.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::proxy::ProxyOptions;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Redis configuration
    pub redis: RedisSettings,

    /// Batching proxy tuning
    pub proxy: ProxySettings,

    /// Probe run parameters
    pub probe: ProbeSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL used for writes
    pub url: String,

    /// Optional separate connection URL for reads (e.g., a replica)
    pub read_url: Option<String>,
}

/// Batching proxy configuration. Durations are in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxySettings {
    /// Maximum jobs per pipelined batch
    pub pipe_size: usize,

    /// Flush interval for partial batches
    pub flush_interval_ms: u64,

    /// Number of batch workers
    pub workers: usize,

    /// Job queue capacity (0 disables batching)
    pub queue_capacity: usize,

    /// Wait for queue space before falling back to a direct write
    pub enqueue_timeout_ms: u64,

    /// Wait for a batch result (0 = fire-and-forget)
    pub ack_timeout_ms: u64,

    /// Bound on one pipeline execution
    pub exec_timeout_ms: u64,

    /// Bound on a direct write
    pub direct_write_timeout_ms: u64,

    /// Namespace prepended to every key
    pub key_prefix: String,

    /// Keys per scan page during a prefix reset
    pub scan_count: usize,
}

/// Probe run configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeSettings {
    /// Number of keys written
    pub writes: usize,

    /// Number of concurrent writer tasks
    pub concurrency: usize,

    /// TTL applied to probe keys in seconds
    pub ttl_secs: u64,
}

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if the proxy options are invalid.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        // Determine the running environment
        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        let defaults = ProxyOptions::default();

        Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("proxy.pipe_size", defaults.pipe_size as u64)?
            .set_default("proxy.flush_interval_ms", millis(defaults.flush_interval))?
            .set_default("proxy.workers", defaults.workers as u64)?
            .set_default("proxy.queue_capacity", defaults.queue_capacity as u64)?
            .set_default("proxy.enqueue_timeout_ms", millis(defaults.enqueue_timeout))?
            .set_default("proxy.ack_timeout_ms", millis(defaults.ack_timeout))?
            .set_default("proxy.exec_timeout_ms", millis(defaults.exec_timeout))?
            .set_default("proxy.direct_write_timeout_ms", millis(defaults.direct_write_timeout))?
            .set_default("proxy.key_prefix", defaults.key_prefix.clone())?
            .set_default("proxy.scan_count", defaults.scan_count as u64)?
            .set_default("probe.writes", 10_000_u64)?
            .set_default("probe.concurrency", 64_u64)?
            .set_default("probe.ttl_secs", 60_u64)?
            // Load from config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Load from environment variables
            // APP__PROXY__PIPE_SIZE=32 -> proxy.pipe_size = 32
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            // Map simple environment variables
            .set_override_option("redis.url", std::env::var("REDIS_URL").ok())?
            .set_override_option("redis.read_url", std::env::var("REDIS_READ_URL").ok())?
            .set_override_option("proxy.key_prefix", std::env::var("KV_PREFIX").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| {
                settings
                    .proxy
                    .to_options()
                    .validate()
                    .map_err(|e| ConfigError::Message(e.to_string()))?;
                Ok(settings)
            })
    }
}

impl ProxySettings {
    /// Converts millisecond settings into proxy options.
    pub fn to_options(&self) -> ProxyOptions {
        ProxyOptions {
            pipe_size: self.pipe_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            enqueue_timeout: Duration::from_millis(self.enqueue_timeout_ms),
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            exec_timeout: Duration::from_millis(self.exec_timeout_ms),
            direct_write_timeout: Duration::from_millis(self.direct_write_timeout_ms),
            key_prefix: self.key_prefix.clone(),
            scan_count: self.scan_count,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}
