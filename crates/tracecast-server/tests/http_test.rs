//! Router-level tests driven through `tower::ServiceExt::oneshot`.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use tracecast_runtime::{DispatchConfig, Publisher, RelayConfig, RelayService};
use tracecast_testing::MockPublisher;
use tracecast_types::DestinationKind;

struct World {
    dir: TempDir,
    router: Router,
}

impl World {
    fn transcript(&self) -> String {
        let path = self.dir.path().join("session-1.jsonl");
        if !path.exists() {
            std::fs::write(&path, "").unwrap();
        }
        path.to_string_lossy().into_owned()
    }
}

fn world() -> World {
    let dir = TempDir::new().unwrap();

    let mut config = RelayConfig::default();
    config.dispatch = DispatchConfig {
        idle_grace_secs: 300,
        ..DispatchConfig::default()
    };

    let mut publishers: HashMap<DestinationKind, Arc<dyn Publisher>> = HashMap::new();
    publishers.insert(DestinationKind::Telegram, Arc::new(MockPublisher::new()));

    let service = RelayService::start(
        config,
        dir.path().join("config.yaml"),
        dir.path().join("state"),
        publishers,
    )
    .unwrap();

    World {
        dir,
        router: tracecast_server::router(service),
    }
}

async fn post_json(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn get_response(router: &Router, uri: &str) -> axum::response::Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    router.clone().oneshot(request).await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn sessions_listing_starts_empty() {
    let world = world();
    let response = get_response(&world.router, "/sessions").await;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value, json!([]));
}

#[tokio::test(flavor = "multi_thread")]
async fn attach_then_list_then_detach() {
    let world = world();
    let destination = json!({"type": "telegram", "chat_id": "42"});

    let (status, body) = post_json(
        &world.router,
        "/attach",
        json!({
            "session_id": "s1",
            "path": world.transcript(),
            "destination": destination,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));

    // Re-attaching the same destination is a success.
    let (status, _) = post_json(
        &world.router,
        "/attach",
        json!({
            "session_id": "s1",
            "path": world.transcript(),
            "destination": destination,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let response = get_response(&world.router, "/sessions").await;
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let listed: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(listed[0]["session_id"], "s1");
    assert_eq!(listed[0]["destinations"][0]["chat_id"], "42");

    let (status, body) = post_json(
        &world.router,
        "/detach",
        json!({"session_id": "s1", "destination": destination}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));

    // Detaching something unknown is still a success.
    let (status, _) = post_json(
        &world.router,
        "/detach",
        json!({"session_id": "ghost", "destination": destination}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_attach_bodies_are_rejected() {
    let world = world();

    let (status, _) = post_json(&world.router, "/attach", json!({"nope": true})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(
        &world.router,
        "/attach",
        json!({
            "session_id": "",
            "path": world.transcript(),
            "destination": {"type": "telegram", "chat_id": "1"},
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unconfigured platform: accepted shape, rejected semantics.
    let (status, _) = post_json(
        &world.router,
        "/attach",
        json!({
            "session_id": "s1",
            "path": world.transcript(),
            "destination": {"type": "slack", "channel": "C1"},
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn events_stream_for_known_session_only() {
    let world = world();

    let response = get_response(&world.router, "/sessions/ghost/events").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (status, _) = post_json(
        &world.router,
        "/attach",
        json!({
            "session_id": "s1",
            "path": world.transcript(),
            "destination": {"type": "telegram", "chat_id": "42"},
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let response = get_response(&world.router, "/sessions/s1/events").await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));
}
