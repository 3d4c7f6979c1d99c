#![forbid(unsafe_code)]

//! **soorma-memory** – The Memory service (component C5): a multi-tenant
//! persistent store for four memory kinds (semantic, episodic, procedural,
//! working) plus workflow state (task contexts, plan contexts, plans,
//! sessions), enforcing tenant and user isolation at the storage layer.

pub mod config;
pub mod embedding;
pub mod entities;
pub mod handlers;
pub mod memory;
pub mod postgres;
pub mod state;
pub mod store;

use axum::routing::{delete, get, patch, post, put};
use axum::Router;

pub use state::AppState;
pub use store::MemoryStore;

/// Build the axum router for the Memory service.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/v1/memory/semantic", post(handlers::upsert_semantic))
        .route("/v1/memory/semantic/search", get(handlers::search_semantic))
        .route("/v1/memory/semantic/:id", delete(handlers::delete_semantic))
        .route("/v1/memory/episodic", post(handlers::log_episodic))
        .route("/v1/memory/episodic/recent", get(handlers::recent_episodic))
        .route("/v1/memory/episodic/search", get(handlers::search_episodic))
        .route("/v1/memory/procedural", post(handlers::save_procedural))
        .route("/v1/memory/procedural/context", get(handlers::procedural_context))
        .route("/v1/memory/working/:plan_id/:key", put(handlers::set_working))
        .route("/v1/memory/working/:plan_id/:key", get(handlers::get_working))
        .route("/v1/memory/working/:plan_id/:key", delete(handlers::delete_working_key))
        .route("/v1/memory/working/:plan_id", delete(handlers::delete_working_plan))
        .route("/v1/memory/tasks", post(handlers::save_task))
        .route("/v1/memory/tasks/by-subtask/:sub_task_id", get(handlers::get_task_by_subtask))
        .route("/v1/memory/tasks/:task_id", get(handlers::get_task))
        .route("/v1/memory/tasks/:task_id", patch(handlers::update_task))
        .route("/v1/memory/tasks/:task_id", delete(handlers::delete_task))
        .route("/v1/memory/plans/context", post(handlers::save_plan_context))
        .route("/v1/memory/plans/context/by-correlation/:correlation_id", get(handlers::get_plan_context_by_correlation))
        .route("/v1/memory/plans/:plan_id/context", get(handlers::get_plan_context))
        .route("/v1/memory/plans/:plan_id/context", patch(handlers::update_plan_context))
        .route("/v1/memory/plans/:plan_id/context", delete(handlers::delete_plan_context))
        .route("/v1/memory/plans", post(handlers::create_plan))
        .route("/v1/memory/plans", get(handlers::list_plans))
        .route("/v1/memory/plans/:plan_id", get(handlers::get_plan))
        .route("/v1/memory/plans/:plan_id/status", put(handlers::update_plan_status))
        .route("/v1/memory/sessions", post(handlers::create_session))
        .route("/v1/memory/sessions", get(handlers::list_sessions))
        .route("/v1/memory/sessions/:session_id", get(handlers::get_session))
        .with_state(state)
}
