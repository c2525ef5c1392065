//! End-to-end request execution against the recording runtime.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use datapred_worker::cache::{KeyValueStore, MemoryStore};
use datapred_worker::pipeline::{PipelineMessage, RunStatus};
use datapred_worker::request::Request;
use datapred_worker::scheduler::{ListenerConfig, RequestListener};
use datapred_worker::worker::RequestState;

use common::{build_worker, FakeStorage, InMemoryQueue, RecordingRuntime};

fn e2e_request() -> Value {
    json!({
        "requestId": "12345",
        "application": "app",
        "consumer": "any",
        "characteristics": [""],
        "country": "US",
        "client": "OGRDS"
    })
}

async fn seeded_cache() -> Arc<MemoryStore> {
    let cache = Arc::new(MemoryStore::new());
    let key = Request::from_value(&e2e_request())
        .expect("request")
        .request_cache_key();
    assert_eq!(key, "app_any__12345_us");
    cache
        .set_value(&key, &e2e_request().to_string())
        .await
        .expect("seed cache");
    cache
}

#[tokio::test]
async fn test_pipeline_e2e() {
    let runtime = Arc::new(RecordingRuntime::new(RunStatus::Completed));
    let worker = build_worker(
        Arc::new(FakeStorage::new(true)),
        seeded_cache().await,
        runtime.clone(),
    );

    let (status, message) = worker
        .ml_exec_request(&e2e_request(), None)
        .await
        .expect("execution");

    assert!(status);
    assert_eq!(message, PipelineMessage::Completed);
    assert_eq!(message.to_string(), "pipeline completed");

    let calls = runtime.calls.lock().unwrap();
    assert_eq!(calls.endpoint_lookups, vec!["rnd_app_any_pipeline".to_string()]);
    assert_eq!(calls.tags.len(), 1);
    assert_eq!(calls.waits, 1);
}

#[tokio::test]
async fn test_pipeline_e2e_not_cached() {
    let runtime = Arc::new(RecordingRuntime::new(RunStatus::Completed));
    let worker = build_worker(
        Arc::new(FakeStorage::new(true)),
        Arc::new(MemoryStore::new()),
        runtime.clone(),
    );

    let (status, message) = worker
        .ml_exec_request(&e2e_request(), None)
        .await
        .expect("execution");

    assert!(!status);
    assert_eq!(message.to_string(), "request not found in cache");
    assert!(runtime.calls.lock().unwrap().connects.is_empty());
}

#[tokio::test]
async fn test_handle_e2e_not_cached_is_rejected() {
    let runtime = Arc::new(RecordingRuntime::new(RunStatus::Completed));
    let worker = build_worker(
        Arc::new(FakeStorage::new(true)),
        Arc::new(MemoryStore::new()),
        runtime.clone(),
    );

    let outcome = worker.handle(&e2e_request(), None).await;

    assert_eq!(outcome.state, RequestState::Rejected);
    assert!(!outcome.status);
    assert_eq!(outcome.message, "request not found in cache");
    assert!(outcome.run_id.is_none());
    assert!(outcome.error.is_none());
    assert!(runtime.calls.lock().unwrap().connects.is_empty());
}

#[tokio::test]
async fn test_handle_e2e() {
    let runtime = Arc::new(RecordingRuntime::new(RunStatus::Canceled));
    let worker = build_worker(
        Arc::new(FakeStorage::new(true)),
        seeded_cache().await,
        runtime,
    );

    let outcome = worker.handle(&e2e_request(), None).await;

    assert_eq!(outcome.request_id, "12345");
    assert_eq!(outcome.state, RequestState::Failed);
    assert!(!outcome.status);
    assert_eq!(outcome.message, "pipeline canceled");
    assert_eq!(outcome.run_id.as_deref(), Some("run-0001"));
    assert!(outcome.error.is_none());
}

#[tokio::test]
async fn test_listener_processes_queue() {
    let runtime = Arc::new(RecordingRuntime::new(RunStatus::Completed));
    let worker = Arc::new(build_worker(
        Arc::new(FakeStorage::new(true)),
        seeded_cache().await,
        runtime.clone(),
    ));
    let queue = Arc::new(InMemoryQueue::with_payloads(vec![e2e_request(), json!({})]));

    let mut listener = RequestListener::new(
        ListenerConfig {
            poll_interval: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(5),
        },
        worker,
        queue.clone(),
    );
    listener.start().expect("start");
    assert!(listener.is_running());
    assert!(listener.start().is_err());

    for _ in 0..200 {
        if queue.completed().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    listener.shutdown().await.expect("shutdown");
    assert!(!listener.is_running());

    let completed = queue.completed();
    assert_eq!(completed.len(), 2);
    assert_eq!(completed[0].1.state, RequestState::Completed);
    assert_eq!(completed[0].1.message, "pipeline completed");
    assert_eq!(completed[1].1.state, RequestState::Rejected);

    let stats = listener.stats();
    assert_eq!(stats.requests_succeeded, 1);
    assert_eq!(stats.requests_unsuccessful, 1);
    assert_eq!(runtime.calls.lock().unwrap().waits, 1);
}
