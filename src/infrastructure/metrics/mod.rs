//! Prometheus Metrics Module
//!
//! Provides proxy-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - Jobs handed to the batching queue
//! - Direct writes by reason (queue saturated, batching disabled)
//! - Batch flushes by trigger and failed flushes
//! - Batch size and flush latency histograms

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Jobs accepted by the batching queue
pub static JOBS_ENQUEUED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("jobs_enqueued_total", "Total number of write jobs enqueued for batching")
            .namespace("kv_proxy"),
    )
    .expect("Failed to create JOBS_ENQUEUED_TOTAL metric")
});

/// Writes that bypassed batching
pub static DIRECT_WRITES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("direct_writes_total", "Total number of unbatched writes").namespace("kv_proxy"),
        &["reason"], // "saturated", "unbatched"
    )
    .expect("Failed to create DIRECT_WRITES_TOTAL metric")
});

/// Batch flushes by what triggered them
pub static FLUSHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("flushes_total", "Total number of batch flushes").namespace("kv_proxy"),
        &["trigger", "outcome"],
    )
    .expect("Failed to create FLUSHES_TOTAL metric")
});

/// Jobs per flushed batch
pub static BATCH_SIZE: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0];
    HistogramVec::new(
        HistogramOpts::new("batch_size", "Number of jobs per flushed batch")
            .namespace("kv_proxy")
            .buckets(buckets),
        &["trigger"],
    )
    .expect("Failed to create BATCH_SIZE metric")
});

/// Pipeline execution latency
pub static FLUSH_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5];
    HistogramVec::new(
        HistogramOpts::new(
            "flush_duration_seconds",
            "Batch pipeline execution latency in seconds",
        )
        .namespace("kv_proxy")
        .buckets(buckets),
        &["trigger"],
    )
    .expect("Failed to create FLUSH_DURATION_SECONDS metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(JOBS_ENQUEUED_TOTAL.clone()))
        .expect("Failed to register JOBS_ENQUEUED_TOTAL");
    registry
        .register(Box::new(DIRECT_WRITES_TOTAL.clone()))
        .expect("Failed to register DIRECT_WRITES_TOTAL");
    registry
        .register(Box::new(FLUSHES_TOTAL.clone()))
        .expect("Failed to register FLUSHES_TOTAL");
    registry
        .register(Box::new(BATCH_SIZE.clone()))
        .expect("Failed to register BATCH_SIZE");
    registry
        .register(Box::new(FLUSH_DURATION_SECONDS.clone()))
        .expect("Failed to register FLUSH_DURATION_SECONDS");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Metrics should be valid UTF-8")
}

/// Helper to record a job accepted by the queue
pub fn record_enqueued() {
    Lazy::force(&REGISTRY);
    JOBS_ENQUEUED_TOTAL.inc();
}

/// Helper to record a write that skipped batching
pub fn record_direct_write(reason: &str) {
    Lazy::force(&REGISTRY);
    DIRECT_WRITES_TOTAL.with_label_values(&[reason]).inc();
}

/// Helper to record one batch flush
pub fn record_flush(trigger: &str, size: usize, ok: bool, duration_secs: f64) {
    Lazy::force(&REGISTRY);
    let outcome = if ok { "ok" } else { "error" };
    FLUSHES_TOTAL.with_label_values(&[trigger, outcome]).inc();
    BATCH_SIZE.with_label_values(&[trigger]).observe(size as f64);
    FLUSH_DURATION_SECONDS
        .with_label_values(&[trigger])
        .observe(duration_secs);
}
