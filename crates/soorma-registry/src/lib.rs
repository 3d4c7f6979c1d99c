#![forbid(unsafe_code)]

//! **soorma-registry** – The Registry service (component C4): an agent,
//! event-type, and payload-schema catalog with TTL-based liveness and
//! structured capability discovery.

pub mod config;
pub mod entities;
pub mod handlers;
pub mod memory;
pub mod sqlite;
pub mod state;
pub mod store;

use axum::routing::{delete, get, post, put};
use axum::Router;

pub use state::AppState;
pub use store::Store;

/// Build the axum router for the Registry service.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/v1/agents", post(handlers::register_agent))
        .route("/v1/agents", get(handlers::discover))
        .route("/v1/agents/:id", delete(handlers::deregister))
        .route("/v1/agents/:id/heartbeat", put(handlers::heartbeat))
        .route("/v1/events", post(handlers::register_event))
        .route("/v1/events", get(handlers::list_events))
        .route("/v1/schemas", post(handlers::register_schema))
        .route("/v1/schemas/:name", get(handlers::get_schema))
        .with_state(state)
}
