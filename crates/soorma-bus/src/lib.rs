#![forbid(unsafe_code)]

//! **soorma-bus** – The Event Bus service (component C3): an HTTP
//! publish + SSE subscribe proxy over the message backbone, with
//! queue-group load balancing and tenant enforcement.

pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod state;

use axum::routing::{get, post};
use axum::Router;

pub use state::AppState;

/// Build the axum router for the Event Bus service.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/v1/events", post(handlers::publish))
        .route("/v1/events/stream", get(handlers::subscribe))
        .route("/v1/events/ack", post(handlers::ack))
        .with_state(state)
}
