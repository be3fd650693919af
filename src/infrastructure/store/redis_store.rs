//! Redis Store
//!
//! `BackingStore` implementation using a Redis `ConnectionManager`.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client};
use tracing::{debug, info, instrument};

use super::{BackingStore, PipelineResult, WriteCommand};
use crate::shared::error::StoreError;

/// Reconnect attempts after a failed connection, including the first one.
const CONNECT_RETRIES: usize = 1;
/// Longest backoff between reconnect attempts.
const MAX_RECONNECT_DELAY: Duration = Duration::from_millis(200);
/// Bound on a single connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

fn manager_config() -> ConnectionManagerConfig {
    ConnectionManagerConfig::new()
        .set_number_of_retries(CONNECT_RETRIES)
        .set_max_delay(MAX_RECONNECT_DELAY)
        .set_connection_timeout(Some(CONNECT_TIMEOUT))
}

/// Creates a Redis-backed store with automatic reconnection.
///
/// Fails fast when the server is unreachable, so a bad URL surfaces at
/// proxy construction rather than on the first write.
#[instrument(skip(url))]
pub async fn create_redis_store(url: &str) -> Result<RedisStore, StoreError> {
    info!("Connecting to Redis...");
    let client = Client::open(url)?;
    let manager = ConnectionManager::new_with_config(client, manager_config()).await?;
    info!("Redis connection established");
    Ok(RedisStore::new(manager))
}

/// Redis-backed store.
///
/// The `ConnectionManager` is multiplexed, so every call works on a cheap
/// clone of it. `close` drops the manager; the underlying connection goes
/// away once in-flight calls release their clones.
pub struct RedisStore {
    conn: RwLock<Option<ConnectionManager>>,
}

impl RedisStore {
    /// Wraps an existing connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn: RwLock::new(Some(conn)),
        }
    }

    fn connection(&self) -> Result<ConnectionManager, StoreError> {
        self.conn.read().clone().ok_or(StoreError::Closed)
    }
}

#[async_trait]
impl BackingStore for RedisStore {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection()?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        debug!(key = %key, hit = value.is_some(), "Store get");
        Ok(value)
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn set(&self, key: &str, value: &[u8], expiration: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        if expiration.is_zero() {
            let _: () = conn.set(key, value).await?;
        } else {
            let _: () = conn.pset_ex(key, value, expiration_millis(expiration)).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection()?;
        let deleted: u64 = conn.del(keys).await?;
        debug!(count = deleted, "Store delete");
        Ok(deleted)
    }

    #[instrument(skip(self, commands), fields(size = commands.len()), level = "debug")]
    async fn exec_pipeline(&self, commands: &[WriteCommand]) -> PipelineResult {
        let mut conn = self.connection()?;

        let mut pipe = redis::pipe();
        for command in commands {
            if command.expiration.is_zero() {
                pipe.set(&command.key, command.value.as_slice()).ignore();
            } else {
                pipe.pset_ex(
                    &command.key,
                    command.value.as_slice(),
                    expiration_millis(command.expiration),
                )
                .ignore();
            }
        }

        // The Redis client reports a failed reply as a failure of the whole
        // pipeline, so there are no per-command errors to hand back.
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(vec![None; commands.len()])
    }

    #[instrument(skip(self), level = "debug")]
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), StoreError> {
        let mut conn = self.connection()?;
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        debug!(cursor, next, found = keys.len(), "Store scan page");
        Ok((next, keys))
    }

    #[instrument(skip(self), level = "debug")]
    async fn flush_all(&self) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let _: () = redis::cmd("FLUSHALL").query_async(&mut conn).await?;
        info!("Store flushed");
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.conn.write().take().is_some() {
            debug!("Redis store closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("open", &self.conn.read().is_some())
            .finish_non_exhaustive()
    }
}

/// Millisecond expiry for `PSETEX`. Sub-millisecond TTLs round up so a
/// nonzero expiration never turns into "no expiry".
fn expiration_millis(expiration: Duration) -> u64 {
    let millis = u64::try_from(expiration.as_millis()).unwrap_or(u64::MAX);
    millis.max(1)
}
