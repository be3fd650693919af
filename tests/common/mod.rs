//! Common Test Utilities
//!
//! Shared helpers, fixtures, and test infrastructure.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chat_kv_proxy::infrastructure::store::MemoryStore;
use chat_kv_proxy::{KvProxy, ProxyOptions};
use tokio_util::sync::CancellationToken;

/// Test proxy wired to an in-memory store
pub struct TestProxy {
    pub proxy: Arc<KvProxy>,
    pub store: Arc<MemoryStore>,
    pub cancel: CancellationToken,
}

impl TestProxy {
    /// Create a proxy with small, test-friendly options
    pub async fn new() -> Self {
        Self::with_options(test_options()).await
    }

    /// Create a proxy with custom options
    pub async fn with_options(options: ProxyOptions) -> Self {
        let store = Arc::new(MemoryStore::new());
        let proxy = KvProxy::builder(options)
            .write_store(store.clone())
            .build()
            .await
            .expect("proxy should start");

        Self {
            proxy: Arc::new(proxy),
            store,
            cancel: CancellationToken::new(),
        }
    }

    /// Set a key through the proxy without expiry
    pub async fn set(&self, key: &str, value: &str) {
        self.proxy
            .set(&self.cancel, key, value, Duration::ZERO)
            .await
            .expect("set should succeed");
    }

    /// Read a key through the proxy as a UTF-8 string
    pub async fn get(&self, key: &str) -> Option<String> {
        self.proxy
            .get(&self.cancel, key)
            .await
            .expect("get should succeed")
            .map(|bytes| String::from_utf8(bytes).expect("test values are UTF-8"))
    }
}

/// Options with a short flush interval and a handful of workers
pub fn test_options() -> ProxyOptions {
    ProxyOptions {
        pipe_size: 4,
        flush_interval: Duration::from_millis(5),
        workers: 4,
        queue_capacity: 256,
        enqueue_timeout: Duration::from_millis(50),
        ack_timeout: Duration::ZERO,
        exec_timeout: Duration::from_secs(1),
        direct_write_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

/// Poll `check` until it holds or `limit` elapses
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Generate a unique test key
pub fn unique_key(prefix: &str) -> String {
    format!("{}{}", prefix, uuid::Uuid::new_v4())
}
