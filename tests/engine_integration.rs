//! End-to-end tests of the queue engine on the in-memory backend.
//!
//! These drive the registry, the orphan reconciler and the HTTP router
//! together without external services.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use queue_server::api::WireResponse;
use queue_server::config::Settings;
use queue_server::queue::{MemoryStorageProvider, QueueError, QueueRegistry};
use queue_server::server::{create_app, AppState};
use queue_server::tasks::{OrphanPolicy, OrphanReconciler};

fn create_registry() -> Arc<QueueRegistry> {
    Arc::new(QueueRegistry::new(Arc::new(MemoryStorageProvider::new())))
}

// ============================================================================
// Basic lifecycle
// ============================================================================

#[tokio::test]
async fn test_new_queue_is_empty() {
    let registry = create_registry();

    assert!(registry.init_queue("orders").await.unwrap());
    assert_eq!(registry.queue_size("orders").await.unwrap(), 0);
    assert_eq!(registry.ephemeral_size("orders").await.unwrap(), 0);
}

#[tokio::test]
async fn test_take_moves_message_to_ephemeral() {
    let registry = create_registry();
    registry.init_queue("orders").await.unwrap();

    assert!(registry.queue("orders", b"hello").await.unwrap());
    assert_eq!(registry.queue_size("orders").await.unwrap(), 1);

    let msg = registry.take("orders").await.unwrap().expect("message");
    assert_eq!(msg.content, b"hello".to_vec());
    assert_eq!(registry.queue_size("orders").await.unwrap(), 0);
    assert_eq!(registry.ephemeral_size("orders").await.unwrap(), 1);

    assert!(registry.finish("orders", &msg).await.unwrap());
    assert_eq!(registry.ephemeral_size("orders").await.unwrap(), 0);
}

#[tokio::test]
async fn test_take_on_empty_queue_returns_none() {
    let registry = create_registry();
    registry.init_queue("orders").await.unwrap();

    assert!(registry.take("orders").await.unwrap().is_none());
    assert!(!registry.pending().contains("orders"));
}

#[tokio::test]
async fn test_invalid_name_is_rejected() {
    let registry = create_registry();

    let err = registry.init_queue("Orders!").await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidName(_)));
    assert_eq!(registry.queue_size("Orders!").await.unwrap(), -1);
}

#[tokio::test]
async fn test_operations_on_missing_queue() {
    let registry = create_registry();

    assert!(!registry.queue("ghost", b"x").await.unwrap());
    assert!(registry.take("ghost").await.unwrap().is_none());
    assert_eq!(registry.queue_size("ghost").await.unwrap(), -1);
    assert_eq!(registry.ephemeral_size("ghost").await.unwrap(), -1);
}

#[tokio::test]
async fn test_names_are_normalized() {
    let registry = create_registry();
    registry.init_queue(" Orders ").await.unwrap();

    assert!(registry.queue("orders", b"a").await.unwrap());
    assert_eq!(registry.queue_size("ORDERS").await.unwrap(), 1);
    assert_eq!(registry.cached_count(), 1);
}

#[tokio::test]
async fn test_fifo_order() {
    let registry = create_registry();
    registry.init_queue("orders").await.unwrap();

    for content in ["a", "b", "c"] {
        registry.queue("orders", content.as_bytes()).await.unwrap();
    }

    for expected in ["a", "b", "c"] {
        let msg = registry.take("orders").await.unwrap().unwrap();
        assert_eq!(msg.content, expected.as_bytes().to_vec());
    }
}

// ============================================================================
// Requeue
// ============================================================================

#[tokio::test]
async fn test_requeue_counts_and_silent_does_not() {
    let registry = create_registry();
    registry.init_queue("orders").await.unwrap();
    registry.queue("orders", b"job").await.unwrap();

    let msg = registry.take("orders").await.unwrap().unwrap();
    assert_eq!(msg.num_requeues, 0);
    assert!(registry.requeue("orders", &msg).await.unwrap());
    assert_eq!(registry.ephemeral_size("orders").await.unwrap(), 0);

    let msg = registry.take("orders").await.unwrap().unwrap();
    assert_eq!(msg.num_requeues, 1);
    assert!(registry.requeue_silent("orders", &msg).await.unwrap());

    let msg = registry.take("orders").await.unwrap().unwrap();
    assert_eq!(msg.num_requeues, 1);
    assert_eq!(msg.content, b"job".to_vec());
}

#[tokio::test]
async fn test_requeue_of_unknown_message_fails() {
    let registry = create_registry();
    registry.init_queue("orders").await.unwrap();
    registry.queue("orders", b"job").await.unwrap();

    let msg = registry.take("orders").await.unwrap().unwrap();
    assert!(registry.finish("orders", &msg).await.unwrap());

    assert!(!registry.requeue("orders", &msg).await.unwrap());
    assert!(!registry.finish("orders", &msg).await.unwrap());
    assert_eq!(registry.queue_size("orders").await.unwrap(), 0);
}

// ============================================================================
// Take exclusivity
// ============================================================================

async fn run_concurrent_takes(messages: usize, takers: usize) {
    let registry = create_registry();
    registry.init_queue("jobs").await.unwrap();

    for i in 0..messages {
        registry.queue("jobs", format!("m{}", i).as_bytes()).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..takers {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move { registry.take("jobs").await }));
    }

    let mut ids = HashSet::new();
    let mut taken = 0;
    for handle in handles {
        if let Some(msg) = handle.await.unwrap().unwrap() {
            taken += 1;
            assert!(ids.insert(msg.id), "message {} delivered twice", msg.id);
        }
    }

    assert_eq!(taken, messages);
    assert_eq!(registry.queue_size("jobs").await.unwrap(), 0);
    assert_eq!(registry.ephemeral_size("jobs").await.unwrap(), messages as i64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_take_on_empty_queue() {
    run_concurrent_takes(0, 8).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_take_single_message() {
    run_concurrent_takes(1, 8).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_take_many_messages() {
    run_concurrent_takes(10, 16).await;
}

// ============================================================================
// Orphan recovery
// ============================================================================

#[tokio::test]
async fn test_orphan_is_requeued_after_threshold() {
    let registry = create_registry();
    registry.init_queue("orders").await.unwrap();
    registry.queue("orders", b"hello").await.unwrap();
    let taken = registry.take("orders").await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let reconciler = OrphanReconciler::new(registry.clone(), OrphanPolicy::Requeue, 50);
    assert_eq!(reconciler.sweep().await, 1);

    assert_eq!(registry.queue_size("orders").await.unwrap(), 1);
    assert_eq!(registry.ephemeral_size("orders").await.unwrap(), 0);

    let recovered = registry.take("orders").await.unwrap().unwrap();
    assert_eq!(recovered.num_requeues, 1);
    assert_eq!(recovered.content, taken.content);
    assert_eq!(recovered.original_timestamp, taken.original_timestamp);
}

#[tokio::test]
async fn test_orphan_is_discarded_after_threshold() {
    let registry = create_registry();
    registry.init_queue("orders").await.unwrap();
    registry.queue("orders", b"a").await.unwrap();
    registry.queue("orders", b"b").await.unwrap();
    registry.take("orders").await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let reconciler = OrphanReconciler::new(registry.clone(), OrphanPolicy::Discard, 50);
    reconciler.sweep().await;

    assert_eq!(registry.queue_size("orders").await.unwrap(), 1);
    assert_eq!(registry.ephemeral_size("orders").await.unwrap(), 0);
    // Drained, so nothing left to recheck
    assert!(!registry.pending().contains("orders"));
}

#[tokio::test]
async fn test_finished_message_is_not_an_orphan() {
    let registry = create_registry();
    registry.init_queue("orders").await.unwrap();
    registry.queue("orders", b"a").await.unwrap();
    let msg = registry.take("orders").await.unwrap().unwrap();
    registry.finish("orders", &msg).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let reconciler = OrphanReconciler::new(registry.clone(), OrphanPolicy::Requeue, 50);
    reconciler.sweep().await;

    assert_eq!(registry.queue_size("orders").await.unwrap(), 0);
    assert_eq!(registry.ephemeral_size("orders").await.unwrap(), 0);
}

#[tokio::test]
async fn test_sweeps_converge_until_drained() {
    let registry = create_registry();
    registry.init_queue("orders").await.unwrap();
    registry.queue("orders", b"a").await.unwrap();
    registry.take("orders").await.unwrap().unwrap();

    // Threshold not yet reached: rescheduled, nothing recovered
    let reconciler = OrphanReconciler::new(registry.clone(), OrphanPolicy::Requeue, 50);
    reconciler.sweep().await;
    assert_eq!(registry.ephemeral_size("orders").await.unwrap(), 1);
    assert!(registry.pending().contains("orders"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    reconciler.sweep().await;

    assert_eq!(registry.ephemeral_size("orders").await.unwrap(), 0);
    assert_eq!(registry.queue_size("orders").await.unwrap(), 1);
    assert!(registry.pending().is_empty());
}

#[tokio::test]
async fn test_startup_seed_recovers_existing_queues() {
    let registry = create_registry();
    registry.init_queue("alpha").await.unwrap();
    registry.init_queue("beta").await.unwrap();
    registry.queue("beta", b"x").await.unwrap();
    registry.take("beta").await.unwrap().unwrap();
    registry.pending().drain();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let reconciler = OrphanReconciler::new(registry.clone(), OrphanPolicy::Requeue, 50);
    assert_eq!(reconciler.seed().await, 2);
    assert_eq!(reconciler.sweep().await, 2);

    assert_eq!(registry.queue_size("beta").await.unwrap(), 1);
    assert_eq!(registry.ephemeral_size("beta").await.unwrap(), 0);
}

#[tokio::test]
async fn test_background_reconciler_recovers_orphans() {
    let registry = create_registry();
    registry.init_queue("orders").await.unwrap();
    registry.queue("orders", b"a").await.unwrap();
    registry.take("orders").await.unwrap().unwrap();

    let reconciler = OrphanReconciler::new(registry.clone(), OrphanPolicy::Requeue, 50);
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let handle = tokio::spawn(reconciler.run(shutdown_rx));

    let mut recovered = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if registry.queue_size("orders").await.unwrap() == 1 {
            recovered = true;
            break;
        }
    }

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();

    assert!(recovered, "orphan was not recovered in time");
    assert_eq!(registry.ephemeral_size("orders").await.unwrap(), 0);
}

// ============================================================================
// Instance cache
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_access_shares_one_instance() {
    let registry = create_registry();
    registry.init_queue("orders").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry.get_instance("orders").await.unwrap().unwrap()
        }));
    }

    let mut instances = Vec::new();
    for handle in handles {
        instances.push(handle.await.unwrap());
    }

    for instance in &instances[1..] {
        assert!(Arc::ptr_eq(&instances[0], instance));
    }
    assert_eq!(registry.cached_count(), 1);
}

#[tokio::test]
async fn test_invalidate_keeps_messages_and_reopens() {
    let registry = create_registry();
    registry.init_queue("orders").await.unwrap();
    registry.queue("orders", b"a").await.unwrap();

    let before = registry.get_instance("orders").await.unwrap().unwrap();
    assert!(registry.invalidate("orders").await);
    assert!(!registry.invalidate("orders").await);
    assert!(before.is_closed().await);

    let after = registry.get_instance("orders").await.unwrap().unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(registry.queue_size("orders").await.unwrap(), 1);
}

#[tokio::test]
async fn test_registry_shutdown_closes_instances() {
    let registry = create_registry();
    registry.init_queue("a").await.unwrap();
    registry.init_queue("b").await.unwrap();

    let a = registry.get_instance("a").await.unwrap().unwrap();
    let b = registry.get_instance("b").await.unwrap().unwrap();

    registry.shutdown().await;

    assert_eq!(registry.cached_count(), 0);
    assert!(a.is_closed().await);
    assert!(b.is_closed().await);
}

// ============================================================================
// HTTP API
// ============================================================================

fn create_test_app() -> Router {
    let state = AppState::new(Settings::default(), create_registry());
    create_app(state)
}

async fn post(app: &Router, path: &str, body: Value) -> WireResponse {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_http_queue_lifecycle() {
    let app = create_test_app();

    let exists = post(&app, "/api/v1/queueExists", json!({"queue_name": "orders"})).await;
    assert_eq!(exists.status, 404);
    assert!(!exists.result);

    let init = post(&app, "/api/v1/initQueue", json!({"queue_name": "orders"})).await;
    assert_eq!(init.status, 200);
    assert!(init.result);

    let exists = post(&app, "/api/v1/queueExists", json!({"queue_name": "orders"})).await;
    assert_eq!(exists.status, 200);

    // "hello" in base64
    let queued = post(
        &app,
        "/api/v1/queue",
        json!({"queue_name": "orders", "content": "aGVsbG8="}),
    )
    .await;
    assert!(queued.result);

    let size = post(&app, "/api/v1/queueSize", json!({"queue_name": "orders"})).await;
    assert_eq!(size.value, Some(queue_server::api::WireValue::Size(1)));

    let taken = post(&app, "/api/v1/take", json!({"queue_name": "orders"})).await;
    assert_eq!(taken.status, 200);
    assert!(taken.result);
    let Some(queue_server::api::WireValue::Message(msg)) = taken.value else {
        panic!("take should return a message");
    };
    assert_eq!(msg.content, "aGVsbG8=");

    let ephemeral = post(&app, "/api/v1/ephemeralSize", json!({"queue_name": "orders"})).await;
    assert_eq!(ephemeral.value, Some(queue_server::api::WireValue::Size(1)));

    let finished = post(
        &app,
        "/api/v1/finish",
        json!({
            "queue_name": "orders",
            "queue_id": msg.queue_id,
            "org_timestamp": msg.org_timestamp,
            "timestamp": msg.timestamp,
            "num_requeues": msg.num_requeues,
            "content": msg.content,
        }),
    )
    .await;
    assert!(finished.result);

    let ephemeral = post(&app, "/api/v1/ephemeralSize", json!({"queue_name": "orders"})).await;
    assert_eq!(ephemeral.value, Some(queue_server::api::WireValue::Size(0)));
}

#[tokio::test]
async fn test_http_requeue_increments_counter() {
    let app = create_test_app();
    post(&app, "/api/v1/initQueue", json!({"queue_name": "jobs"})).await;
    post(&app, "/api/v1/queue", json!({"queue_name": "jobs", "content": "eA=="})).await;

    let taken = post(&app, "/api/v1/take", json!({"queue_name": "jobs"})).await;
    let Some(queue_server::api::WireValue::Message(msg)) = taken.value else {
        panic!("take should return a message");
    };

    let requeued = post(
        &app,
        "/api/v1/requeue",
        json!({"queue_name": "jobs", "queue_id": msg.queue_id, "content": msg.content}),
    )
    .await;
    assert!(requeued.result);

    let taken = post(&app, "/api/v1/take", json!({"queue_name": "jobs"})).await;
    let Some(queue_server::api::WireValue::Message(msg)) = taken.value else {
        panic!("take should return a message");
    };
    assert_eq!(msg.num_requeues, 1);
}

#[tokio::test]
async fn test_http_invalid_name() {
    let app = create_test_app();

    let response = post(&app, "/api/v1/initQueue", json!({"queue_name": "Orders!"})).await;
    assert_eq!(response.status, 400);
    assert!(!response.result);
    assert_eq!(response.message, "Invalid queue name [Orders!]!");

    let response = post(&app, "/api/v1/queueExists", json!({"queue_name": ""})).await;
    assert_eq!(response.status, 400);
}

#[tokio::test]
async fn test_http_take_on_missing_queue() {
    let app = create_test_app();

    let response = post(&app, "/api/v1/take", json!({"queue_name": "ghost"})).await;
    assert_eq!(response.status, 200);
    assert!(!response.result);
    assert!(response.value.is_none());
}

#[tokio::test]
async fn test_http_malformed_body() {
    let app = create_test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/take")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let wire: WireResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(wire.status, 400);
    assert!(!wire.result);
}

#[tokio::test]
async fn test_http_invalid_base64_content() {
    let app = create_test_app();
    post(&app, "/api/v1/initQueue", json!({"queue_name": "orders"})).await;

    let response = post(
        &app,
        "/api/v1/queue",
        json!({"queue_name": "orders", "content": "***"}),
    )
    .await;
    assert_eq!(response.status, 400);

    let size = post(&app, "/api/v1/queueSize", json!({"queue_name": "orders"})).await;
    assert_eq!(size.value, Some(queue_server::api::WireValue::Size(0)));
}

#[tokio::test]
async fn test_http_health() {
    let app = create_test_app();

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["queue"]["backend"], "memory");
}

#[tokio::test]
async fn test_http_metrics() {
    let app = create_test_app();
    post(&app, "/api/v1/queueSize", json!({"queue_name": "orders"})).await;

    let request = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("queue_server_responses_total"));
}
