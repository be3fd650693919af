//! Proxy tuning options.

use std::time::Duration;

use crate::shared::error::ProxyError;

/// How `KvProxy::reset` clears data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStrategy {
    /// Flush the whole store (no key prefix configured)
    FlushAll,
    /// Scan `prefix*` and delete page by page
    ScanPrefix,
}

/// Options fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyOptions {
    /// Maximum jobs per pipelined batch
    pub pipe_size: usize,
    /// Longest a buffered job waits before a timed flush
    pub flush_interval: Duration,
    /// Number of batch workers
    pub workers: usize,
    /// Job queue capacity; 0 disables batching entirely
    pub queue_capacity: usize,
    /// How long `set` waits for queue space before writing directly; zero
    /// skips the queue for every write
    pub enqueue_timeout: Duration,
    /// How long `set` waits for a batch result; zero means fire-and-forget
    pub ack_timeout: Duration,
    /// Bound on one pipeline execution
    pub exec_timeout: Duration,
    /// Bound on a direct write
    pub direct_write_timeout: Duration,
    /// Namespace prepended to every key
    pub key_prefix: String,
    /// Keys requested per scan page during a prefix reset
    pub scan_count: usize,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            pipe_size: 16,
            flush_interval: Duration::from_millis(1),
            workers: 256,
            queue_capacity: 100_000,
            enqueue_timeout: Duration::from_millis(2),
            ack_timeout: Duration::ZERO,
            exec_timeout: Duration::from_millis(250),
            direct_write_timeout: Duration::from_millis(50),
            key_prefix: String::new(),
            scan_count: 1000,
        }
    }
}

impl ProxyOptions {
    pub fn reset_strategy(&self) -> ResetStrategy {
        if self.key_prefix.is_empty() {
            ResetStrategy::FlushAll
        } else {
            ResetStrategy::ScanPrefix
        }
    }

    /// Whether `set` goes through the worker pool at all.
    pub fn batching_enabled(&self) -> bool {
        self.queue_capacity > 0
    }

    /// Rejects combinations the worker pool cannot run with.
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.batching_enabled() {
            if self.pipe_size == 0 {
                return Err(ProxyError::InvalidConfig("pipe_size must be at least 1".into()));
            }
            if self.workers == 0 {
                return Err(ProxyError::InvalidConfig(
                    "workers must be at least 1 when queue_capacity is nonzero".into(),
                ));
            }
            if self.flush_interval.is_zero() {
                return Err(ProxyError::InvalidConfig(
                    "flush_interval must be greater than zero".into(),
                ));
            }
        }
        if self.scan_count == 0 {
            return Err(ProxyError::InvalidConfig("scan_count must be at least 1".into()));
        }
        Ok(())
    }
}
