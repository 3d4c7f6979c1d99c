//! Router-level integration tests for the Registry service.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use soorma_auth::AuthProfile;
use soorma_backbone::InMemoryBackbone;
use soorma_registry::memory::InMemoryStore;
use soorma_registry::{router, AppState};
use tower::ServiceExt;

fn test_state() -> AppState {
    AppState::new(Arc::new(InMemoryStore::new()), Arc::new(InMemoryBackbone::default()), AuthProfile::Dev, 60)
}

#[tokio::test]
async fn register_then_heartbeat_succeeds() {
    let app = router(test_state());

    let body = json!({
        "name": "calculator",
        "version": "1.0.0",
        "capabilities": ["arithmetic"],
        "events_consumed": ["calc.add.requested"],
        "events_produced": ["calc.add.done"],
        "tenant_scope": "t1",
        "ttl_seconds": 30,
    });
    let request = Request::builder()
        .method("POST")
        .uri("/v1/agents")
        .header("content-type", "application/json")
        .header("x-tenant-id", "t1")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let request = Request::builder()
        .method("PUT")
        .uri("/v1/agents/calculator:1.0.0/heartbeat")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn heartbeat_for_unregistered_agent_is_404() {
    let app = router(test_state());
    let request = Request::builder()
        .method("PUT")
        .uri("/v1/agents/ghost:1.0.0/heartbeat")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn discover_finds_registered_agent_by_capability() {
    let app = router(test_state());
    let body = json!({
        "name": "calculator",
        "version": "1.0.0",
        "capabilities": ["arithmetic"],
        "events_consumed": [],
        "events_produced": [],
        "tenant_scope": "t1",
        "ttl_seconds": 30,
    });
    let request = Request::builder()
        .method("POST")
        .uri("/v1/agents")
        .header("content-type", "application/json")
        .header("x-tenant-id", "t1")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap();

    let request = Request::builder()
        .uri("/v1/agents?capability=arithmetic")
        .header("x-tenant-id", "t1")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let agents: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(agents.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn register_agent_rejects_tenant_mismatch() {
    let app = router(test_state());
    let body = json!({
        "name": "calculator",
        "version": "1.0.0",
        "capabilities": [],
        "events_consumed": [],
        "events_produced": [],
        "tenant_scope": "t2",
        "ttl_seconds": 30,
    });
    let request = Request::builder()
        .method("POST")
        .uri("/v1/agents")
        .header("content-type", "application/json")
        .header("x-tenant-id", "t1")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
