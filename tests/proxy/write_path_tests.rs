//! Write Path Tests
//!
//! Batched writes, direct fallback, ordering and batching triggers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chat_kv_proxy::infrastructure::store::BackingStore;
use chat_kv_proxy::ProxyOptions;
use pretty_assertions::assert_eq;
use tokio_test::assert_ok;

use crate::common::{eventually, test_options, unique_key, TestProxy};

/// A batched write becomes readable after one flush interval
#[tokio::test]
async fn test_batched_set_then_get() {
    // Arrange
    let app = TestProxy::new().await;
    let key = unique_key("user:");

    // Act
    app.set(&key, "v").await;
    tokio::time::sleep(app.proxy.options().flush_interval).await;

    // Assert
    let store = Arc::clone(&app.store);
    let expected = key.clone();
    let landed = eventually(Duration::from_secs(2), || {
        let store = Arc::clone(&store);
        let expected = expected.clone();
        async move { store.keys().contains(&expected) }
    })
    .await;
    assert!(landed, "batched write should be flushed");
    assert_eq!(app.get(&key).await.as_deref(), Some("v"));
    assert!(app.store.calls().pipeline >= 1);
    assert_eq!(app.store.calls().set, 0);
}

/// With no queue every write is direct and immediately readable
#[tokio::test]
async fn test_direct_set_then_get() {
    // Arrange
    let app = TestProxy::with_options(ProxyOptions {
        queue_capacity: 0,
        ..test_options()
    })
    .await;

    // Act
    app.set("user:1", "v").await;

    // Assert: no flush delay needed
    assert_eq!(app.get("user:1").await.as_deref(), Some("v"));
    assert_eq!(app.store.calls().set, 1);
    assert_eq!(app.store.calls().pipeline, 0);
}

/// Zero queue capacity routes every write around the workers
#[tokio::test]
async fn test_zero_capacity_never_batches() {
    // Arrange
    let app = TestProxy::with_options(ProxyOptions {
        queue_capacity: 0,
        flush_interval: Duration::from_secs(60),
        ..test_options()
    })
    .await;

    // Act
    let started = Instant::now();
    for i in 0..20 {
        app.set(&format!("k{i}"), "v").await;
    }

    // Assert
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(app.store.calls().set, 20);
    assert_eq!(app.store.keys().len(), 20);
    assert!(app.store.batch_sizes().is_empty());
}

/// A zero enqueue timeout sends every write straight to the store
#[tokio::test]
async fn test_zero_enqueue_timeout_never_batches() {
    // Arrange: plenty of queue room and a flush interval far in the future
    let app = TestProxy::with_options(ProxyOptions {
        queue_capacity: 1024,
        enqueue_timeout: Duration::ZERO,
        flush_interval: Duration::from_secs(60),
        ..test_options()
    })
    .await;

    // Act
    for i in 0..5 {
        app.set(&format!("k{i}"), "v").await;
    }

    // Assert: visible at once, without any pipeline
    assert_eq!(app.store.calls().set, 5);
    assert_eq!(app.store.keys().len(), 5);
    assert!(app.store.batch_sizes().is_empty());
}

/// A saturated queue falls back to direct writes instead of failing
#[tokio::test]
async fn test_saturated_queue_falls_back_to_direct_write() {
    // Arrange: one slot, a slow pipeline and a short enqueue wait
    let app = TestProxy::with_options(ProxyOptions {
        workers: 1,
        pipe_size: 1,
        queue_capacity: 1,
        enqueue_timeout: Duration::from_millis(1),
        ..test_options()
    })
    .await;
    app.store.set_pipeline_delay(Duration::from_millis(200));

    // Act
    for i in 0..10 {
        app.set(&format!("k{i}"), "v").await;
    }

    // Assert
    assert!(app.store.calls().set > 0, "some writes should bypass the queue");
    assert_ok!(app.proxy.close().await);
    assert_eq!(app.store.keys().len(), 10);
}

/// Repeating an identical write leaves the same state as writing once
#[tokio::test]
async fn test_identical_sets_are_idempotent() {
    // Arrange
    let app = TestProxy::new().await;

    // Act
    app.set("k", "v").await;
    app.set("k", "v").await;
    assert_ok!(app.proxy.close().await);

    // Assert
    assert_eq!(app.store.keys(), vec!["k".to_string()]);
}

/// Writes to one worker apply in enqueue order
#[tokio::test]
async fn test_same_worker_writes_apply_in_order() {
    // Arrange
    let app = TestProxy::with_options(ProxyOptions {
        workers: 1,
        pipe_size: 16,
        ..test_options()
    })
    .await;

    // Act
    app.set("a", "v1").await;
    app.set("a", "v2").await;
    assert_ok!(app.proxy.close().await);

    // Assert
    assert_eq!(app.store.get("a").await.unwrap().as_deref(), Some(&b"v2"[..]));
}

/// `workers x pipe_size` concurrent writes trigger a size flush long before
/// the flush interval
#[tokio::test]
async fn test_full_batches_flush_before_interval() {
    // Arrange
    let options = ProxyOptions {
        workers: 2,
        pipe_size: 4,
        flush_interval: Duration::from_secs(30),
        ..test_options()
    };
    let total = options.workers * options.pipe_size;
    let app = Arc::new(TestProxy::with_options(options).await);

    // Act
    let writers: Vec<_> = (0..total)
        .map(|i| {
            let app = Arc::clone(&app);
            tokio::spawn(async move { app.set(&format!("k{i}"), "v").await })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    // Assert
    let store = Arc::clone(&app.store);
    let flushed = eventually(Duration::from_secs(2), || {
        let store = Arc::clone(&store);
        async move { store.calls().pipeline >= 1 }
    })
    .await;
    assert!(flushed, "expected a size-triggered flush");
    assert!(app.store.batch_sizes().iter().all(|&size| size == 4));

    assert_ok!(app.proxy.close().await);
    assert_eq!(app.store.keys().len(), total);
}

/// Expiring writes are applied with their TTL
#[tokio::test]
async fn test_ttl_is_applied_on_batched_path() {
    // Arrange
    let app = TestProxy::new().await;

    // Act
    app.proxy
        .set(&app.cancel, "short", "v", Duration::from_millis(300))
        .await
        .unwrap();
    assert_ok!(app.proxy.close().await);

    // Assert
    assert_eq!(app.store.keys(), vec!["short".to_string()]);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(app.store.keys().is_empty());
}

/// Waiting for acks surfaces per-command failures only to the failing job
#[tokio::test]
async fn test_ack_reports_own_command_error() {
    // Arrange
    let app = TestProxy::with_options(ProxyOptions {
        workers: 1,
        ack_timeout: Duration::from_secs(2),
        ..test_options()
    })
    .await;
    app.store.fail_key("bad");

    // Act
    let good = app.proxy.set(&app.cancel, "good", "1", Duration::ZERO);
    let bad = app.proxy.set(&app.cancel, "bad", "2", Duration::ZERO);
    let (good, bad) = tokio::join!(good, bad);

    // Assert
    assert!(good.is_ok());
    assert!(bad.is_err());
    assert_ok!(app.proxy.close().await);
}

/// Missing keys read as absent rather than as errors
#[tokio::test]
async fn test_get_missing_key_is_none() {
    let app = TestProxy::new().await;
    assert_eq!(app.get("missing").await, None);
}

/// Deletes go straight to the store
#[tokio::test]
async fn test_delete_is_direct() {
    // Arrange
    let app = TestProxy::with_options(ProxyOptions {
        queue_capacity: 0,
        ..test_options()
    })
    .await;
    app.set("k", "v").await;

    // Act
    assert_ok!(app.proxy.delete(&app.cancel, "k").await);

    // Assert
    assert_eq!(app.get("k").await, None);
    assert_eq!(app.store.calls().delete, 1);
}
