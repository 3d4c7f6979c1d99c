//! Router-level integration tests for the Event Bus service.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use soorma_auth::AuthProfile;
use soorma_backbone::InMemoryBackbone;
use soorma_bus::{router, AppState};
use tower::ServiceExt;

fn test_state() -> AppState {
    AppState::new(Arc::new(InMemoryBackbone::default()), AuthProfile::Dev)
}

#[tokio::test]
async fn health_check_responds_ok() {
    let app = router(test_state());
    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn publish_rejects_tenant_mismatch() {
    let app = router(test_state());
    let body = json!({
        "event_type": "order.process.requested",
        "topic": "action-requests",
        "tenant_id": "tenant-b",
        "data": {},
        "response_event": "order.process.completed",
    });
    let request = Request::builder()
        .method("POST")
        .uri("/v1/events")
        .header("content-type", "application/json")
        .header("x-tenant-id", "tenant-a")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn publish_accepts_well_formed_envelope() {
    let app = router(test_state());
    let body = json!({
        "event_type": "order.process.requested",
        "topic": "action-requests",
        "tenant_id": "tenant-a",
        "data": {"order_id": "o-1"},
        "response_event": "order.process.completed",
    });
    let request = Request::builder()
        .method("POST")
        .uri("/v1/events")
        .header("content-type", "application/json")
        .header("x-tenant-id", "tenant-a")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let envelope: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(envelope["topic"], "action-requests");
    assert!(envelope["event_id"].is_string());
}

#[tokio::test]
async fn publish_rejects_unknown_topic() {
    let app = router(test_state());
    let body = json!({
        "event_type": "order.process.requested",
        "topic": "not-a-real-topic",
        "tenant_id": "tenant-a",
        "data": {},
    });
    let request = Request::builder()
        .method("POST")
        .uri("/v1/events")
        .header("content-type", "application/json")
        .header("x-tenant-id", "tenant-a")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ack_returns_no_content() {
    let app = router(test_state());
    let body = json!({ "event_id": uuid::Uuid::new_v4(), "subscription_id": null });
    let request = Request::builder()
        .method("POST")
        .uri("/v1/events/ack")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
