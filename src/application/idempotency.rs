//! Idempotency Key Store
//!
//! Stores the response of an HTTP request under its idempotency key so a
//! retried request can be answered without re-executing it. Responses are
//! written through the batching proxy; lookups read straight from the store.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = IdempotencyStore::new(proxy.clone(), Duration::from_secs(24 * 3600));
//!
//! if let Some(previous) = store.lookup(&cancel, user_id, &key).await? {
//!     return Ok(previous);
//! }
//! let response = handle_request().await?;
//! store.record(&cancel, user_id, &key, &response).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::proxy::KvProxy;
use crate::shared::error::ProxyError;

/// Key namespace for idempotency records.
pub const IDEMPOTENCY_PREFIX: &str = "idempotency:";

/// Idempotency store error type
#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("Invalid idempotency key: {0}")]
    InvalidKey(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

/// A response captured for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Vec<u8>,
}

/// Longest accepted client-supplied key.
pub const MAX_KEY_LENGTH: usize = 255;

/// Response store keyed by (caller, idempotency key).
#[derive(Clone)]
pub struct IdempotencyStore {
    proxy: Arc<KvProxy>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(proxy: Arc<KvProxy>, ttl: Duration) -> Self {
        Self { proxy, ttl }
    }

    /// Fetches the response recorded for this key, if any.
    ///
    /// An unreadable record is treated as absent so the request runs again.
    #[instrument(skip(self, cancel), level = "debug")]
    pub async fn lookup(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        key: &str,
    ) -> Result<Option<StoredResponse>, IdempotencyError> {
        let record_key = record_key(owner, key)?;
        let Some(data) = self.proxy.get(cancel, &record_key).await? else {
            debug!(key = %record_key, "Idempotency miss");
            return Ok(None);
        };

        match serde_json::from_slice(&data) {
            Ok(response) => {
                debug!(key = %record_key, "Idempotency hit");
                Ok(Some(response))
            }
            Err(err) => {
                warn!(key = %record_key, error = %err, "Discarding unreadable idempotency record");
                Ok(None)
            }
        }
    }

    /// Records the response for this key with the store's TTL.
    #[instrument(skip(self, cancel, response), level = "debug")]
    pub async fn record(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        key: &str,
        response: &StoredResponse,
    ) -> Result<(), IdempotencyError> {
        let record_key = record_key(owner, key)?;
        let data = serde_json::to_vec(response)?;
        self.proxy.set(cancel, &record_key, data, self.ttl).await?;
        Ok(())
    }

    /// Drops the record, letting the next request with this key run.
    #[instrument(skip(self, cancel), level = "debug")]
    pub async fn forget(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        key: &str,
    ) -> Result<(), IdempotencyError> {
        let record_key = record_key(owner, key)?;
        self.proxy.delete(cancel, &record_key).await?;
        Ok(())
    }
}

impl std::fmt::Debug for IdempotencyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Builds the logical key for a record (e.g., "idempotency:user_1:abc").
fn record_key(owner: &str, key: &str) -> Result<String, IdempotencyError> {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return Err(IdempotencyError::InvalidKey(format!(
            "length must be between 1 and {MAX_KEY_LENGTH}"
        )));
    }
    if key.chars().any(char::is_control) {
        return Err(IdempotencyError::InvalidKey(
            "control characters are not allowed".into(),
        ));
    }
    Ok(format!("{}{}:{}", IDEMPOTENCY_PREFIX, owner, key))
}
