//! Idempotency Store Tests

use std::time::Duration;

use chat_kv_proxy::application::{IdempotencyStore, StoredResponse};
use chat_kv_proxy::infrastructure::store::BackingStore;
use chat_kv_proxy::ProxyOptions;
use pretty_assertions::assert_eq;

use crate::common::{test_options, TestProxy};

fn response() -> StoredResponse {
    StoredResponse {
        status: 201,
        headers: vec![("content-type".into(), "application/json".into())],
        body: br#"{"id":"42"}"#.to_vec(),
    }
}

async fn direct_app() -> TestProxy {
    TestProxy::with_options(ProxyOptions {
        queue_capacity: 0,
        ..test_options()
    })
    .await
}

/// A recorded response is replayed on lookup
#[tokio::test]
async fn test_record_then_lookup() {
    // Arrange
    let app = direct_app().await;
    let store = IdempotencyStore::new(app.proxy.clone(), Duration::from_secs(60));

    // Act
    store
        .record(&app.cancel, "user_1", "req-1", &response())
        .await
        .unwrap();
    let found = store.lookup(&app.cancel, "user_1", "req-1").await.unwrap();

    // Assert
    assert_eq!(found, Some(response()));
}

/// Keys are scoped per owner
#[tokio::test]
async fn test_lookup_is_scoped_by_owner() {
    let app = direct_app().await;
    let store = IdempotencyStore::new(app.proxy.clone(), Duration::from_secs(60));

    store
        .record(&app.cancel, "user_1", "req-1", &response())
        .await
        .unwrap();

    let other = store.lookup(&app.cancel, "user_2", "req-1").await.unwrap();
    assert_eq!(other, None);
}

/// Forgetting a key lets the request run again
#[tokio::test]
async fn test_forget() {
    let app = direct_app().await;
    let store = IdempotencyStore::new(app.proxy.clone(), Duration::from_secs(60));
    store
        .record(&app.cancel, "user_1", "req-1", &response())
        .await
        .unwrap();

    store.forget(&app.cancel, "user_1", "req-1").await.unwrap();

    assert_eq!(store.lookup(&app.cancel, "user_1", "req-1").await.unwrap(), None);
}

/// Corrupt records read as misses
#[tokio::test]
async fn test_unreadable_record_is_a_miss() {
    let app = direct_app().await;
    let store = IdempotencyStore::new(app.proxy.clone(), Duration::from_secs(60));
    app.store
        .set("idempotency:user_1:req-1", b"not json", Duration::ZERO)
        .await
        .unwrap();

    let found = store.lookup(&app.cancel, "user_1", "req-1").await.unwrap();

    assert_eq!(found, None);
}

/// Records expire with the configured TTL
#[tokio::test]
async fn test_record_expires() {
    let app = direct_app().await;
    let store = IdempotencyStore::new(app.proxy.clone(), Duration::from_millis(50));
    store
        .record(&app.cancel, "user_1", "req-1", &response())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(store.lookup(&app.cancel, "user_1", "req-1").await.unwrap(), None);
}
