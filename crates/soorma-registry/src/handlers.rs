//! HTTP surface for the Registry service (spec §6.2 / §4.3).

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use soorma_auth::extract_caller;
use soorma_types::SoormaError;

use crate::entities::{AgentDefinition, DiscoverFilter, EventDefinition, PayloadSchema};
use crate::state::AppState;

fn check_tenant(caller_tenant: &str, requested_tenant: &str) -> Result<(), SoormaError> {
    if caller_tenant != requested_tenant {
        return Err(SoormaError::Forbidden(format!(
            "cannot act for tenant {requested_tenant:?} as tenant {caller_tenant:?}"
        )));
    }
    Ok(())
}

/// `POST /v1/agents` — register or refresh an agent's catalog entry.
pub async fn register_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(def): Json<AgentDefinition>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    check_tenant(&caller.tenant_id, &def.tenant_scope)?;

    let record = state.store.register_agent(def).await?;
    state
        .announce_lifecycle(
            "agent.registered",
            &record.tenant_scope,
            serde_json::json!({ "agent_id": record.agent_id }),
        )
        .await;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `PUT /v1/agents/{id}/heartbeat` — refresh liveness. Returns 404 if the
/// agent isn't currently registered so clients can auto-recover by
/// re-registering exactly once (spec §4.3 failure model).
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<impl IntoResponse, SoormaError> {
    let record = state.store.heartbeat(&agent_id).await?;
    Ok(Json(record))
}

/// `DELETE /v1/agents/{id}` — explicit deregistration.
pub async fn deregister(State(state): State<AppState>, Path(agent_id): Path<String>) -> Result<StatusCode, SoormaError> {
    let record = state.store.deregister(&agent_id).await?;
    state
        .announce_lifecycle(
            "agent.deregistered",
            &record.tenant_scope,
            serde_json::json!({ "agent_id": record.agent_id }),
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// Query parameters accepted by `GET /v1/agents`.
#[derive(Debug, Deserialize)]
pub struct DiscoverQuery {
    capability: Option<String>,
    consumes_event: Option<String>,
    produces_event: Option<String>,
    tenant_scope: Option<String>,
}

/// `GET /v1/agents?capability=&consumes_event=&produces_event=&tenant_scope=`
/// — structured capability discovery, limited to `status=active` (spec
/// §4.3).
pub async fn discover(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DiscoverQuery>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let tenant_scope = query.tenant_scope.unwrap_or_else(|| caller.tenant_id.clone());
    check_tenant(&caller.tenant_id, &tenant_scope)?;

    let filter = DiscoverFilter {
        capability: query.capability,
        consumes_event: query.consumes_event,
        produces_event: query.produces_event,
        tenant_scope: Some(tenant_scope),
    };
    let agents = state.store.discover(filter).await?;
    Ok(Json(agents))
}

/// `POST /v1/events` — upsert an event type definition.
pub async fn register_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(def): Json<EventDefinition>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    check_tenant(&caller.tenant_id, &def.tenant_scope)?;
    let def = state.store.register_event(def).await?;
    Ok((StatusCode::CREATED, Json(def)))
}

/// Query parameters accepted by `GET /v1/events`.
#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    topic: Option<String>,
}

/// `GET /v1/events?topic=` — list event definitions for the caller's
/// tenant, optionally narrowed to one topic.
pub async fn list_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListEventsQuery>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let events = state.store.list_events(&caller.tenant_id, query.topic.as_deref()).await?;
    Ok(Json(events))
}

/// `POST /v1/schemas` — register a JSON payload schema.
pub async fn register_schema(
    State(state): State<AppState>,
    Json(schema): Json<PayloadSchema>,
) -> Result<impl IntoResponse, SoormaError> {
    let schema = state.store.register_schema(schema).await?;
    Ok((StatusCode::CREATED, Json(schema)))
}

/// `GET /v1/schemas/{name}` — fetch a registered schema by name.
pub async fn get_schema(State(state): State<AppState>, Path(name): Path<String>) -> Result<impl IntoResponse, SoormaError> {
    let schema = state.store.get_schema(&name).await?;
    Ok(Json(schema))
}

/// Liveness/readiness probe.
pub async fn health() -> impl IntoResponse {
    #[derive(Serialize)]
    struct Health {
        status: &'static str,
    }
    Json(Health { status: "ok" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_tenant_rejects_mismatch() {
        assert!(check_tenant("t1", "t2").is_err());
        assert!(check_tenant("t1", "t1").is_ok());
    }
}
