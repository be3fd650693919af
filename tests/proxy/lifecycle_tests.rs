//! Lifecycle Tests
//!
//! Construction, close and cancellation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chat_kv_proxy::infrastructure::store::MemoryStore;
use chat_kv_proxy::{KvProxy, ProxyError, ProxyOptions};
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use crate::common::{test_options, TestProxy};

/// Closing twice succeeds both times and leaves injected stores open
#[tokio::test]
async fn test_double_close() {
    // Arrange
    let app = TestProxy::new().await;
    app.set("k", "v").await;

    // Act
    assert_ok!(app.proxy.close().await);
    assert_ok!(app.proxy.close().await);

    // Assert
    assert!(app.proxy.is_closed());
    assert!(!app.store.is_closed());
    assert_eq!(app.store.calls().close, 0);
}

/// Close drains every queued job before returning
#[tokio::test]
async fn test_close_drains_queued_jobs() {
    // Arrange: an interval long enough that only close can flush
    let app = TestProxy::with_options(ProxyOptions {
        flush_interval: Duration::from_secs(60),
        pipe_size: 64,
        ..test_options()
    })
    .await;
    for i in 0..50 {
        app.set(&format!("k{i}"), "v").await;
    }
    assert_eq!(app.store.keys().len(), 0);

    // Act
    assert_ok!(app.proxy.close().await);

    // Assert
    assert_eq!(app.store.keys().len(), 50);
}

/// Writes after close are rejected
#[tokio::test]
async fn test_set_after_close_is_rejected() {
    let app = TestProxy::new().await;
    assert_ok!(app.proxy.close().await);

    let result = app
        .proxy
        .set(&app.cancel, "k", "v", Duration::ZERO)
        .await;

    assert!(matches!(result, Err(ProxyError::Closed)));
}

/// A set with an already cancelled token never reaches the store
#[tokio::test]
async fn test_cancelled_set_skips_store() {
    // Arrange
    let app = TestProxy::with_options(ProxyOptions {
        queue_capacity: 0,
        ..test_options()
    })
    .await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    // Act
    let result = app.proxy.set(&cancel, "k", "v", Duration::ZERO).await;

    // Assert
    assert!(matches!(result, Err(ProxyError::Cancelled)));
    assert_eq!(app.store.calls().total(), 0);
}

/// Building without a write store is a configuration error
#[tokio::test]
async fn test_build_requires_write_store() {
    let result = KvProxy::builder(ProxyOptions::default()).build().await;
    assert!(matches!(result, Err(ProxyError::InvalidConfig(_))));
}

/// Invalid options are rejected at construction
#[tokio::test]
async fn test_build_rejects_invalid_options() {
    let result = KvProxy::builder(ProxyOptions {
        pipe_size: 0,
        ..ProxyOptions::default()
    })
    .write_store(Arc::new(MemoryStore::new()))
    .build()
    .await;
    assert!(matches!(result, Err(ProxyError::InvalidConfig(_))));
}

/// An unreachable Redis server fails construction without a long retry loop
#[tokio::test]
async fn test_build_fails_fast_on_unreachable_store() {
    // Act
    let started = Instant::now();
    let result = KvProxy::builder(ProxyOptions::default())
        .write_url("redis://127.0.0.1:1/")
        .build()
        .await;

    // Assert
    assert!(matches!(result, Err(ProxyError::Construction(_))));
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "construction took {:?}",
        started.elapsed()
    );
}

/// Separate read and write stores: reads never hit the write store
#[tokio::test]
async fn test_separate_read_store() {
    // Arrange
    let write = Arc::new(MemoryStore::new());
    let read = Arc::new(MemoryStore::new());
    let proxy = KvProxy::builder(ProxyOptions {
        queue_capacity: 0,
        ..test_options()
    })
    .write_store(write.clone())
    .read_store(read.clone())
    .build()
    .await
    .unwrap();
    let cancel = CancellationToken::new();

    // Act
    proxy.set(&cancel, "k", "v", Duration::ZERO).await.unwrap();
    let value = proxy.get(&cancel, "k").await.unwrap();

    // Assert
    assert_eq!(value, None);
    assert_eq!(write.calls().get, 0);
    assert_eq!(read.calls().get, 1);
    assert_ok!(proxy.close().await);
    assert!(!read.is_closed());
}
