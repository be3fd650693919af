//! In-Memory Store
//!
//! A `BackingStore` living in process memory. Used by the test suites and
//! for running the proxy without a Redis server. Keeps per-operation call
//! counters and supports failure and latency injection.

use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{BackingStore, PipelineResult, WriteCommand};
use crate::shared::error::StoreError;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Number of calls seen per operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub get: usize,
    pub set: usize,
    pub delete: usize,
    pub pipeline: usize,
    pub scan: usize,
    pub flush_all: usize,
    pub close: usize,
}

impl CallCounts {
    /// Total calls excluding `close`.
    pub fn total(&self) -> usize {
        self.get + self.set + self.delete + self.pipeline + self.scan + self.flush_all
    }
}

#[derive(Debug, Default)]
struct Counters {
    get: AtomicUsize,
    set: AtomicUsize,
    delete: AtomicUsize,
    pipeline: AtomicUsize,
    scan: AtomicUsize,
    flush_all: AtomicUsize,
    close: AtomicUsize,
}

/// In-process key-value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    counters: Counters,
    batch_sizes: Mutex<Vec<usize>>,
    closed: AtomicBool,
    fail_pipelines: AtomicBool,
    failing_keys: RwLock<HashSet<String>>,
    pipeline_delay: Mutex<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every pipeline fail as a whole.
    pub fn fail_pipelines(&self, fail: bool) {
        self.fail_pipelines.store(fail, Ordering::SeqCst);
    }

    /// Makes writes to `key` fail individually.
    pub fn fail_key(&self, key: impl Into<String>) {
        self.failing_keys.write().insert(key.into());
    }

    /// Delays every pipeline execution.
    pub fn set_pipeline_delay(&self, delay: Duration) {
        *self.pipeline_delay.lock() = delay;
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            get: c.get.load(Ordering::SeqCst),
            set: c.set.load(Ordering::SeqCst),
            delete: c.delete.load(Ordering::SeqCst),
            pipeline: c.pipeline.load(Ordering::SeqCst),
            scan: c.scan.load(Ordering::SeqCst),
            flush_all: c.flush_all.load(Ordering::SeqCst),
            close: c.close.load(Ordering::SeqCst),
        }
    }

    /// Sizes of every executed pipeline, in execution order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Live keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn check_key(&self, key: &str) -> Result<(), StoreError> {
        if self.failing_keys.read().contains(key) {
            return Err(StoreError::Backend(format!("write rejected for {key}")));
        }
        Ok(())
    }

    fn insert(&self, key: &str, value: &[u8], expiration: Duration) {
        let expires_at = (!expiration.is_zero()).then(|| Instant::now() + expiration);
        self.entries.write().insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.counters.get.fetch_add(1, Ordering::SeqCst);
        self.ensure_open()?;

        let now = Instant::now();
        let value = self
            .entries
            .read()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone());
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], expiration: Duration) -> Result<(), StoreError> {
        self.counters.set.fetch_add(1, Ordering::SeqCst);
        self.ensure_open()?;
        self.check_key(key)?;
        self.insert(key, value, expiration);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.counters.delete.fetch_add(1, Ordering::SeqCst);
        self.ensure_open()?;

        let mut entries = self.entries.write();
        let deleted = keys.iter().filter(|k| entries.remove(*k).is_some()).count();
        Ok(deleted as u64)
    }

    async fn exec_pipeline(&self, commands: &[WriteCommand]) -> PipelineResult {
        self.counters.pipeline.fetch_add(1, Ordering::SeqCst);
        self.ensure_open()?;

        let delay = *self.pipeline_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.batch_sizes.lock().push(commands.len());
        if self.fail_pipelines.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("pipeline rejected".into()));
        }

        let results = commands
            .iter()
            .map(|command| match self.check_key(&command.key) {
                Ok(()) => {
                    self.insert(&command.key, &command.value, command.expiration);
                    None
                }
                Err(err) => Some(err),
            })
            .collect();
        debug!(size = commands.len(), "Memory pipeline executed");
        Ok(results)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), StoreError> {
        self.counters.scan.fetch_add(1, Ordering::SeqCst);
        self.ensure_open()?;

        // Keys are visited in hash order and the cursor is the next hash to
        // resume from, so deleting keys between pages never skips others.
        // Like Redis, a page examines `count` keys and returns only those
        // matching.
        let mut hashed: Vec<(u64, String)> = self
            .keys()
            .into_iter()
            .map(|key| (key_hash(&key), key))
            .filter(|(hash, _)| *hash >= cursor)
            .collect();
        hashed.sort();

        let mut end = count.max(1).min(hashed.len());
        while end > 0 && end < hashed.len() && hashed[end].0 == hashed[end - 1].0 {
            end += 1;
        }
        let next = match hashed.get(end) {
            Some((hash, _)) => *hash,
            None => 0,
        };
        let page = hashed
            .drain(..end)
            .map(|(_, key)| key)
            .filter(|key| glob_match(pattern.as_bytes(), key.as_bytes()))
            .collect();
        Ok((next, page))
    }

    async fn flush_all(&self) -> Result<(), StoreError> {
        self.counters.flush_all.fetch_add(1, Ordering::SeqCst);
        self.ensure_open()?;
        self.entries.write().clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.counters.close.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn key_hash(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Redis-style glob matching supporting `*`, `?` and backslash escapes.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| glob_match(rest, &text[skip..])),
        Some((b'?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((b'\\', rest)) if !rest.is_empty() => {
            text.first() == Some(&rest[0]) && glob_match(&rest[1..], &text[1..])
        }
        Some((c, rest)) => text.first() == Some(c) && glob_match(rest, &text[1..]),
    }
}
