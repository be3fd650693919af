//! Backing Store Module
//!
//! The remote key-value service the proxy writes through to.
//!
//! This module provides:
//! - A `BackingStore` trait abstracting the handful of commands the proxy needs
//! - A `RedisStore` implementation on top of a Redis `ConnectionManager`
//! - A `MemoryStore` implementation for tests and local runs
//!
//! # Architecture
//!
//! ```text
//! +-------------------+
//! |     KvProxy       |
//! +-------------------+
//!     |           |
//!   write        read
//!     v           v
//! +-------------------+
//! | BackingStore trait|  <-- Abstract interface
//! +-------------------+
//!          |
//!          v
//! +-------------------+
//! |    RedisStore     |  <-- Concrete implementation
//! +-------------------+
//!          |
//!          v
//! +-------------------+
//! | ConnectionManager |  <-- Multiplexed Redis connection
//! +-------------------+
//! ```

mod memory_store;
mod redis_store;

pub use memory_store::{CallCounts, MemoryStore};
pub use redis_store::{create_redis_store, RedisStore};

use std::time::Duration;

use async_trait::async_trait;

use crate::shared::error::StoreError;

/// One write queued into a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCommand {
    /// Physical (already namespaced) key
    pub key: String,
    /// Opaque payload
    pub value: Vec<u8>,
    /// Time-to-live, `Duration::ZERO` for no expiry
    pub expiration: Duration,
}

/// Outcome of a pipelined execution.
///
/// `Err` is a failure of the pipeline as a whole. `Ok` carries one entry per
/// submitted command, `Some` when that command failed on its own.
pub type PipelineResult = Result<Vec<Option<StoreError>>, StoreError>;

/// Commands the proxy issues against the remote key-value service.
///
/// Implementations must tolerate concurrent use: the proxy shares one handle
/// between all workers and direct callers without additional locking.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Reads a key. A missing key is `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Writes a key, with expiry when `expiration` is nonzero.
    async fn set(&self, key: &str, value: &[u8], expiration: Duration) -> Result<(), StoreError>;

    /// Deletes keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Executes all commands in one round trip.
    async fn exec_pipeline(&self, commands: &[WriteCommand]) -> PipelineResult;

    /// One page of a cursor scan. Returns the next cursor (0 when complete)
    /// and the keys matching `pattern` on this page.
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), StoreError>;

    /// Removes every key in the store.
    async fn flush_all(&self) -> Result<(), StoreError>;

    /// Releases the handle. Later calls fail with `StoreError::Closed`.
    async fn close(&self) -> Result<(), StoreError>;
}
