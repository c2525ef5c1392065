//! Integration tests against a live Redis.
//!
//! Run with: REDIS_TEST_URL=redis://localhost:6379/15 cargo test --test redis_integration -- --ignored
//!
//! The target database is flushed.

use std::time::Duration;

use serde_json::json;

use datapred_worker::cache::{KeyValueStore, RedisStore};
use datapred_worker::scheduler::{RequestQueue, RequestSource};
use datapred_worker::worker::{RequestOutcome, RequestState};

fn redis_url() -> String {
    std::env::var("REDIS_TEST_URL").unwrap_or_else(|_| "redis://localhost:6379/15".to_string())
}

#[tokio::test]
#[ignore] // Run with: cargo test --test redis_integration -- --ignored
async fn test_store_roundtrip_and_patterns() {
    let store = RedisStore::connect(&redis_url()).await.expect("connect");
    store.flush_all().await.expect("flush");

    for suffix in ["model", "service", "property"] {
        store
            .set_value(&format!("app_consumer_us_char_{}", suffix), r#"{"key": "value"}"#)
            .await
            .expect("set");
    }
    store.set_value("unrelated", "1").await.expect("set");

    assert_eq!(
        store
            .get_value("app_consumer_us_char_model")
            .await
            .expect("get")
            .as_deref(),
        Some(r#"{"key": "value"}"#)
    );
    assert_eq!(
        store
            .get_matched_keys("app_consumer_us_char_*")
            .await
            .expect("keys")
            .len(),
        3
    );
    assert_eq!(store.get_all().await.expect("all").len(), 4);

    store.flush_all().await.expect("flush");
    assert!(store.get_all().await.expect("all").is_empty());
}

#[tokio::test]
#[ignore]
async fn test_queue_lifecycle() {
    let queue = RequestQueue::connect(&redis_url(), "datapred_test_requests")
        .await
        .expect("connect");
    queue.clear().await.expect("clear");

    let id = queue
        .enqueue(json!({"requestId": "12345"}))
        .await
        .expect("enqueue");
    assert_eq!(queue.len().await.expect("len"), 1);

    let request = queue
        .dequeue(Duration::from_secs(1))
        .await
        .expect("dequeue")
        .expect("a request");
    assert_eq!(request.id, id);
    assert_eq!(queue.processing_len().await.expect("processing"), 1);

    let outcome = RequestOutcome::new(
        "12345",
        RequestState::Completed,
        true,
        "pipeline completed",
        Duration::from_secs(2),
    );
    queue.complete(&request, &outcome).await.expect("complete");

    let stats = queue.stats().await.expect("stats");
    assert_eq!(stats.total_requests(), 0);
    assert_eq!(
        queue.get_outcome(id).await.expect("outcome"),
        Some(outcome)
    );

    assert!(queue
        .dequeue(Duration::from_secs(1))
        .await
        .expect("dequeue")
        .is_none());
}
