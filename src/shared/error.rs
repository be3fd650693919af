//! Proxy Error Types
//!
//! Centralized error handling for the storage proxy and its backends.

use std::sync::Arc;

/// Failure reported by a backing store.
///
/// Cloneable so a single pipeline failure can be attributed to every
/// buffered job of a batch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[source] Arc<redis::RedisError>),

    #[error("Store operation timed out: {0}")]
    Timeout(&'static str),

    #[error("Store handle is closed")]
    Closed,

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Redis(Arc::new(err))
    }
}

/// Proxy error type
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Construction failed: {0}")]
    Construction(#[source] StoreError),

    #[error("Proxy is closed")]
    Closed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ProxyError {
    /// Whether the error came from the caller giving up rather than the store.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProxyError::Cancelled)
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;
