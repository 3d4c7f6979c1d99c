//! Router-level integration tests for the Memory service.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use soorma_auth::AuthProfile;
use soorma_memory::embedding::HashEmbeddingProvider;
use soorma_memory::memory::InMemoryStore;
use soorma_memory::{router, AppState};
use tower::ServiceExt;
use uuid::Uuid;

fn test_state() -> AppState {
    AppState::new(Arc::new(InMemoryStore::default()), Arc::new(HashEmbeddingProvider::default()), AuthProfile::Dev, 5)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn upsert_then_search_semantic_memory_round_trips() {
    let app = router(test_state());

    let request = Request::builder()
        .method("POST")
        .uri("/v1/memory/semantic")
        .header("content-type", "application/json")
        .header("x-tenant-id", "t1")
        .header("x-user-id", "u1")
        .body(Body::from(json!({"content": "the sky is blue"}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["action"], "created");

    let request = Request::builder()
        .uri("/v1/memory/semantic/search?query=the%20sky%20is%20blue")
        .header("x-tenant-id", "t1")
        .header("x-user-id", "u1")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let hits = body_json(response).await;
    assert_eq!(hits.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn upsert_semantic_rejects_user_mismatch_query_param() {
    let app = router(test_state());
    let request = Request::builder()
        .method("POST")
        .uri("/v1/memory/semantic?user_id=someone-else")
        .header("content-type", "application/json")
        .header("x-tenant-id", "t1")
        .header("x-user-id", "u1")
        .body(Body::from(json!({"content": "hello"}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn task_context_save_get_update_round_trips() {
    let app = router(test_state());
    let task_id = "task-1";

    let body = json!({
        "tenant_id": "t1",
        "user_id": "u1",
        "agent_id": "calculator",
        "task_id": task_id,
        "plan_id": null,
        "event_type": "calc.add.requested",
        "data": {"a": 1, "b": 2},
        "response_event": null,
        "response_topic": null,
        "sub_tasks": {},
        "state": {}
    });
    let request = Request::builder()
        .method("POST")
        .uri("/v1/memory/tasks")
        .header("content-type", "application/json")
        .header("x-tenant-id", "t1")
        .header("x-user-id", "u1")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let request = Request::builder()
        .uri(format!("/v1/memory/tasks/{task_id}"))
        .header("x-tenant-id", "t1")
        .header("x-user-id", "u1")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["event_type"], "calc.add.requested");

    let patch = json!({"state": {"progress": "started"}});
    let request = Request::builder()
        .method("PATCH")
        .uri(format!("/v1/memory/tasks/{task_id}"))
        .header("content-type", "application/json")
        .header("x-tenant-id", "t1")
        .header("x-user-id", "u1")
        .body(Body::from(patch.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let patched = body_json(response).await;
    assert_eq!(patched["state"]["progress"], "started");
}

#[tokio::test]
async fn working_memory_set_get_delete_round_trips() {
    let app = router(test_state());
    let plan_id = Uuid::new_v4();

    let request = Request::builder()
        .method("PUT")
        .uri(format!("/v1/memory/working/{plan_id}/step"))
        .header("content-type", "application/json")
        .header("x-tenant-id", "t1")
        .header("x-user-id", "u1")
        .body(Body::from(json!("fetching").to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let request = Request::builder()
        .uri(format!("/v1/memory/working/{plan_id}/step"))
        .header("x-tenant-id", "t1")
        .header("x-user-id", "u1")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value, json!("fetching"));

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/v1/memory/working/{plan_id}/step"))
        .header("x-tenant-id", "t1")
        .header("x-user-id", "u1")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
