//! # KV Proxy Probe
//!
//! Operational smoke run for the batching storage proxy.
//!
//! This entry point:
//! - Initializes tracing
//! - Loads configuration
//! - Connects the proxy to Redis
//! - Writes a batch of probe keys concurrently and reads a sample back
//! - Closes the proxy, draining in-flight batches

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chat_kv_proxy::config::Settings;
use chat_kv_proxy::infrastructure::metrics;
use chat_kv_proxy::proxy::KvProxy;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    chat_kv_proxy::telemetry::init_tracing();

    info!("Starting KV proxy probe...");

    // Load configuration from environment and config files
    let settings = Settings::load()?;
    info!(
        environment = %settings.environment,
        writes = settings.probe.writes,
        concurrency = settings.probe.concurrency,
        "Configuration loaded"
    );

    let proxy = chat_kv_proxy::startup::build_proxy(&settings)
        .await
        .context("failed to start storage proxy")?;

    // Ctrl-C aborts the writers' waits; queued jobs are still drained on close.
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling probe");
                cancel.cancel();
            }
        }
    });

    let outcome = run_probe(&proxy, &settings, &cancel).await;

    proxy.close().await.context("failed to close storage proxy")?;
    info!(metrics = %metrics::gather_metrics(), "Final proxy metrics");

    outcome
}

async fn run_probe(proxy: &Arc<KvProxy>, settings: &Settings, cancel: &CancellationToken) -> Result<()> {
    let run_id = uuid::Uuid::now_v7();
    let ttl = Duration::from_secs(settings.probe.ttl_secs);
    let writes = settings.probe.writes;
    let concurrency = settings.probe.concurrency.max(1);

    let started = Instant::now();
    let tasks = (0..concurrency).map(|task| {
        let proxy = Arc::clone(proxy);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            for i in (task..writes).step_by(concurrency) {
                let key = probe_key(run_id, i);
                proxy.set(&cancel, &key, i.to_string(), ttl).await?;
            }
            Ok::<_, chat_kv_proxy::shared::error::ProxyError>(())
        })
    });
    for result in try_join_all(tasks).await? {
        result?;
    }
    let elapsed = started.elapsed();
    info!(
        writes,
        elapsed_ms = elapsed.as_millis() as u64,
        per_sec = (writes as f64 / elapsed.as_secs_f64().max(f64::EPSILON)) as u64,
        "Probe writes accepted"
    );

    // Give the workers one flush interval plus a pipeline round trip.
    let options = proxy.options();
    tokio::time::sleep(options.flush_interval + options.exec_timeout).await;

    let sample = writes.min(100);
    let mut missing = 0;
    for i in 0..sample {
        let value = proxy.get(cancel, &probe_key(run_id, i)).await?;
        if value.as_deref() != Some(i.to_string().as_bytes()) {
            missing += 1;
        }
    }
    info!(sample, missing, "Probe read-back complete");

    if missing > 0 {
        bail!("{missing} of {sample} probe keys were not readable");
    }
    Ok(())
}

fn probe_key(run_id: uuid::Uuid, index: usize) -> String {
    format!("probe:{}:{}", run_id, index)
}
