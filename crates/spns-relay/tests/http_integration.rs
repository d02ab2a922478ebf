#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use spns_relay::dispatch::{DispatchReceiver, dispatch_queue};
use spns_relay::notifications::NotificationService;
use spns_relay::registry::{ClosedGroupRegistry, DeviceRegistry};
use spns_relay::router::NotificationRouter;
use spns_relay::server::{AppState, build_router};
use spns_relay::storage::{MemoryStore, RegistryStore};

struct TestApp {
    app: axum::Router,
    rx: DispatchReceiver,
    store: Arc<MemoryStore>,
}

fn test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let shared: Arc<dyn RegistryStore> = Arc::clone(&store) as Arc<dyn RegistryStore>;
    let devices = Arc::new(DeviceRegistry::new(Arc::clone(&shared), 5));
    let groups = Arc::new(ClosedGroupRegistry::new(shared));
    let (queue, rx) = dispatch_queue(None);
    let notifications = NotificationService::new(
        NotificationRouter::new(Arc::clone(&devices), Arc::clone(&groups)),
        queue,
    );
    TestApp {
        app: build_router(AppState {
            devices,
            groups,
            notifications,
        }),
        rx,
        store,
    }
}

/// POST a JSON body and return (status, parsed body).
async fn post(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    post_raw(app, uri, body.to_string()).await
}

async fn post_raw(app: &axum::Router, uri: &str, body: String) -> (StatusCode, Value) {
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn drain_tokens(rx: &mut DispatchReceiver) -> Vec<String> {
    let mut tokens: Vec<String> = std::iter::from_fn(|| rx.try_dequeue())
        .map(|job| job.destination.token)
        .collect();
    tokens.sort_unstable();
    tokens
}

#[tokio::test]
async fn health_returns_ok() {
    let t = test_app();
    let resp = t
        .app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn register_then_notify_identity() {
    let mut t = test_app();
    for token in ["A", "B"] {
        let (status, body) = post(
            &t.app,
            "/register",
            json!({"token": token, "identity": "05aa", "platform": "android"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));
    }

    let (status, body) = post(
        &t.app,
        "/notify",
        json!({"identity": "05aa", "payload": "aGVsbG8="}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enqueued"], 2);
    assert_eq!(drain_tokens(&mut t.rx), vec!["A", "B"]);
}

#[tokio::test]
async fn notify_group_dedups_and_counts() {
    let mut t = test_app();
    post(&t.app, "/register", json!({"token": "T1", "identity": "id1"})).await;
    post(&t.app, "/register", json!({"token": "T2", "identity": "id2"})).await;
    post(&t.app, "/register", json!({"token": "T3", "identity": "id2"})).await;
    for member in ["id1", "id2"] {
        let (status, _) = post(
            &t.app,
            "/subscribe_closed_group",
            json!({"group_id": "g1", "identity": member}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = post(&t.app, "/notify", json!({"group_id": "g1", "payload": "x"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enqueued"], 3);
    assert_eq!(drain_tokens(&mut t.rx), vec!["T1", "T2", "T3"]);

    post(
        &t.app,
        "/unsubscribe_closed_group",
        json!({"group_id": "g1", "identity": "id2"}),
    )
    .await;
    let (_, body) = post(&t.app, "/notify", json!({"group_id": "g1", "payload": "x"})).await;
    assert_eq!(body["enqueued"], 1);
}

#[tokio::test]
async fn unregister_reports_owner() {
    let t = test_app();
    post(&t.app, "/register", json!({"token": "A", "identity": "05aa"})).await;

    let (status, body) = post(&t.app, "/unregister", json!({"token": "A"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "identity": "05aa"}));

    let (status, body) = post(&t.app, "/unregister", json!({"token": "A"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "identity": null}));
}

#[tokio::test]
async fn notify_without_target_is_bad_request() {
    let mut t = test_app();
    post(&t.app, "/register", json!({"token": "A", "identity": "05aa"})).await;

    let (status, body) = post(&t.app, "/notify", json!({"payload": "x"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = post(
        &t.app,
        "/notify",
        json!({"identity": "05aa", "group_id": "g1", "payload": "x"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(drain_tokens(&mut t.rx).is_empty());
}

#[tokio::test]
async fn empty_token_is_bad_request() {
    let t = test_app();
    let (status, body) = post(&t.app, "/register", json!({"token": "", "identity": "05aa"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("token"));
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let t = test_app();
    let (status, body) = post_raw(&t.app, "/register", "{not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn storage_outage_is_service_unavailable() {
    let t = test_app();
    t.store.set_unavailable(true);

    let (status, body) = post(&t.app, "/register", json!({"token": "A", "identity": "05aa"})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);

    t.store.set_unavailable(false);
    let (_, body) = post(&t.app, "/notify", json!({"identity": "05aa", "payload": "x"})).await;
    assert_eq!(body["enqueued"], 0);
}

#[tokio::test]
async fn token_moves_between_identities() {
    let mut t = test_app();
    post(&t.app, "/register", json!({"token": "A", "identity": "05aa"})).await;
    post(&t.app, "/register", json!({"token": "A", "identity": "05bb"})).await;

    let (_, body) = post(&t.app, "/notify", json!({"identity": "05aa", "payload": "x"})).await;
    assert_eq!(body["enqueued"], 0);
    let (_, body) = post(&t.app, "/notify", json!({"identity": "05bb", "payload": "x"})).await;
    assert_eq!(body["enqueued"], 1);
    assert_eq!(drain_tokens(&mut t.rx), vec!["A"]);
}
