//! HTTP surface for the Memory service (spec §6.2). Every handler
//! resolves the acting `user_id` from the caller's authenticated
//! identity, optionally cross-checked against an explicit query
//! parameter — never from the request body (spec §6.2).

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use soorma_auth::{extract_caller, CallerContext};
use soorma_types::SoormaError;
use uuid::Uuid;

use crate::entities::{
    LogInteractionRequest, Plan, PlanContext, PlanStatus, ProcedureType, Session, TaskContext, UpsertKnowledgeRequest,
};
use crate::state::AppState;

/// Resolve the acting `user_id`: the caller must be authenticated as a
/// specific user (not just a tenant), and an explicit query parameter,
/// if present, must agree with that identity.
fn resolve_user(caller: &CallerContext, query_user_id: Option<&str>) -> Result<String, SoormaError> {
    let caller_user_id =
        caller.user_id.as_deref().ok_or_else(|| SoormaError::Unauthenticated("caller has no user identity".into()))?;
    match query_user_id {
        Some(requested) if requested != caller_user_id => {
            Err(SoormaError::Forbidden(format!("cannot act for user {requested:?} as user {caller_user_id:?}")))
        }
        _ => Ok(caller_user_id.to_string()),
    }
}

fn check_owner(caller: &CallerContext, tenant_id: &str, user_id: &str) -> Result<(), SoormaError> {
    if caller.tenant_id != tenant_id || caller.user_id.as_deref() != Some(user_id) {
        return Err(SoormaError::Forbidden("record owner must match caller identity".into()));
    }
    Ok(())
}

// ---- Semantic memory ----

#[derive(Debug, Deserialize)]
pub struct UserIdQuery {
    user_id: Option<String>,
}

/// `POST /v1/memory/semantic?user_id=` — upsert a piece of durable
/// knowledge.
pub async fn upsert_semantic(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserIdQuery>,
    Json(req): Json<UpsertKnowledgeRequest>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;

    let embedding = state.embeddings.embed(&req.content).await?;
    let response = state.store.upsert_knowledge(&caller.tenant_id, &user_id, req, Some(embedding)).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Deserialize)]
pub struct SemanticSearchQuery {
    user_id: Option<String>,
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    include_public: bool,
}

/// `GET /v1/memory/semantic/search?user_id=&query=&top_k=&include_public=`.
pub async fn search_semantic(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SemanticSearchQuery>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;

    let embedding = state.embeddings.embed(&query.query).await?;
    let top_k = query.top_k.unwrap_or(state.default_top_k);
    let hits = state
        .store
        .search_knowledge(&caller.tenant_id, &user_id, &embedding, top_k, query.include_public)
        .await?;
    Ok(Json(hits))
}

/// `DELETE /v1/memory/semantic/{id}?user_id=`.
pub async fn delete_semantic(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Query(query): Query<UserIdQuery>,
) -> Result<StatusCode, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    state.store.delete_knowledge(&caller.tenant_id, &user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- Episodic memory ----

/// `POST /v1/memory/episodic?user_id=` — append an interaction turn.
pub async fn log_episodic(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserIdQuery>,
    Json(req): Json<LogInteractionRequest>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;

    let embedding = state.embeddings.embed(&req.content).await?;
    let row = state.store.log_interaction(&caller.tenant_id, &user_id, req, Some(embedding)).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

#[derive(Debug, Deserialize)]
pub struct RecentEpisodicQuery {
    user_id: Option<String>,
    agent_id: String,
    #[serde(default = "default_recent_limit")]
    limit: usize,
}

fn default_recent_limit() -> usize {
    20
}

/// `GET /v1/memory/episodic/recent?user_id=&agent_id=&limit=`.
pub async fn recent_episodic(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RecentEpisodicQuery>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    let rows = state.store.recent_interactions(&caller.tenant_id, &user_id, &query.agent_id, query.limit).await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct SearchEpisodicQuery {
    user_id: Option<String>,
    agent_id: String,
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

/// `GET /v1/memory/episodic/search?user_id=&agent_id=&query=&top_k=`.
pub async fn search_episodic(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchEpisodicQuery>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;

    let embedding = state.embeddings.embed(&query.query).await?;
    let top_k = query.top_k.unwrap_or(state.default_top_k);
    let hits =
        state.store.search_interactions(&caller.tenant_id, &user_id, &query.agent_id, &embedding, top_k).await?;
    Ok(Json(hits))
}

// ---- Procedural memory ----

#[derive(Debug, Deserialize)]
pub struct ProceduralContextQuery {
    user_id: Option<String>,
    agent_id: String,
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

/// `GET /v1/memory/procedural/context?user_id=&agent_id=&query=&top_k=`
/// — the skills relevant to the caller's current situation.
pub async fn procedural_context(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ProceduralContextQuery>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;

    let embedding = state.embeddings.embed(&query.query).await?;
    let top_k = query.top_k.unwrap_or(state.default_top_k);
    let hits =
        state.store.get_relevant_skills(&caller.tenant_id, &user_id, &query.agent_id, &embedding, top_k).await?;
    Ok(Json(hits))
}

/// Request body for `POST /v1/memory/procedural`. Not named in spec
/// §6.2 (which only exposes the read path); exposed so agents can
/// actually register skills for `procedural_context` to later surface.
#[derive(Debug, Deserialize)]
pub struct SaveSkillRequest {
    pub agent_id: String,
    pub trigger_condition: String,
    pub procedure_type: ProcedureType,
    pub content: String,
}

/// `POST /v1/memory/procedural?user_id=` — register a reusable skill.
pub async fn save_procedural(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserIdQuery>,
    Json(req): Json<SaveSkillRequest>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;

    let embedding = state.embeddings.embed(&req.trigger_condition).await?;
    let row = state
        .store
        .save_skill(&caller.tenant_id, &user_id, &req.agent_id, req.trigger_condition, req.procedure_type, req.content, Some(embedding))
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

// ---- Working memory ----

#[derive(Debug, Deserialize)]
pub struct WorkingKeyQuery {
    user_id: Option<String>,
}

/// `PUT /v1/memory/working/{plan_id}/{key}?user_id=`.
pub async fn set_working(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((plan_id, key)): Path<(Uuid, String)>,
    Query(query): Query<WorkingKeyQuery>,
    Json(value): Json<Value>,
) -> Result<StatusCode, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    state.store.set_working(&caller.tenant_id, &user_id, plan_id, key, value).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /v1/memory/working/{plan_id}/{key}?user_id=`.
pub async fn get_working(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((plan_id, key)): Path<(Uuid, String)>,
    Query(query): Query<WorkingKeyQuery>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    let value = state.store.get_working(&caller.tenant_id, &user_id, plan_id, &key).await?;
    Ok(Json(value))
}

/// `DELETE /v1/memory/working/{plan_id}/{key}?user_id=`.
pub async fn delete_working_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((plan_id, key)): Path<(Uuid, String)>,
    Query(query): Query<WorkingKeyQuery>,
) -> Result<StatusCode, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    state.store.delete_working(&caller.tenant_id, &user_id, plan_id, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /v1/memory/working/{plan_id}?user_id=` — plan cleanup.
pub async fn delete_working_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(plan_id): Path<Uuid>,
    Query(query): Query<WorkingKeyQuery>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    let deleted = state.store.delete_plan_working(&caller.tenant_id, &user_id, plan_id).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

// ---- Task contexts ----

/// `POST /v1/memory/tasks` — save a task context. `tenant_id`/`user_id`
/// are taken from the body here because a `TaskContext` is an
/// agent-internal record a worker creates for itself, not a
/// user-initiated write — but the caller's identity must still own it.
pub async fn save_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(ctx): Json<TaskContext>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    check_owner(&caller, &ctx.tenant_id, &ctx.user_id)?;
    let saved = state.store.save_task_context(ctx).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

/// `GET /v1/memory/tasks/{task_id}?user_id=`.
pub async fn get_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Query(query): Query<UserIdQuery>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    let ctx = state.store.get_task_context(&caller.tenant_id, &user_id, &task_id).await?;
    Ok(Json(ctx))
}

/// `PATCH /v1/memory/tasks/{task_id}?user_id=`.
pub async fn update_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Query(query): Query<UserIdQuery>,
    Json(patch): Json<Map<String, Value>>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    let ctx = state.store.update_task_context(&caller.tenant_id, &user_id, &task_id, patch).await?;
    Ok(Json(ctx))
}

/// `DELETE /v1/memory/tasks/{task_id}?user_id=`.
pub async fn delete_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Query(query): Query<UserIdQuery>,
) -> Result<StatusCode, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    state.store.delete_task_context(&caller.tenant_id, &user_id, &task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /v1/memory/tasks/by-subtask/{sub_task_id}?user_id=`.
pub async fn get_task_by_subtask(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(sub_task_id): Path<String>,
    Query(query): Query<UserIdQuery>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    let ctx = state.store.get_task_by_subtask(&caller.tenant_id, &user_id, &sub_task_id).await?;
    Ok(Json(ctx))
}

// ---- Plan contexts ----

/// `POST /v1/memory/plans/context`.
pub async fn save_plan_context(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(ctx): Json<PlanContext>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    check_owner(&caller, &ctx.tenant_id, &ctx.user_id)?;
    let saved = state.store.save_plan_context(ctx).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

/// `GET /v1/memory/plans/{plan_id}/context?user_id=`.
pub async fn get_plan_context(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(plan_id): Path<Uuid>,
    Query(query): Query<UserIdQuery>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    let ctx = state.store.get_plan_context(&caller.tenant_id, &user_id, plan_id).await?;
    Ok(Json(ctx))
}

/// `PATCH /v1/memory/plans/{plan_id}/context?user_id=`.
pub async fn update_plan_context(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(plan_id): Path<Uuid>,
    Query(query): Query<UserIdQuery>,
    Json(patch): Json<Map<String, Value>>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    let ctx = state.store.update_plan_context(&caller.tenant_id, &user_id, plan_id, patch).await?;
    Ok(Json(ctx))
}

/// `DELETE /v1/memory/plans/{plan_id}/context?user_id=`.
pub async fn delete_plan_context(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(plan_id): Path<Uuid>,
    Query(query): Query<UserIdQuery>,
) -> Result<StatusCode, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    state.store.delete_plan_context(&caller.tenant_id, &user_id, plan_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /v1/memory/plans/context/by-correlation/{correlation_id}?user_id=`
/// — the authoritative lookup the planner transition filter uses
/// (spec §4.5).
pub async fn get_plan_context_by_correlation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(correlation_id): Path<String>,
    Query(query): Query<UserIdQuery>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    let ctx = state.store.get_plan_context_by_correlation(&caller.tenant_id, &user_id, &correlation_id).await?;
    Ok(Json(ctx))
}

// ---- Plans & sessions ----

/// `POST /v1/memory/plans`.
pub async fn create_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(plan): Json<Plan>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    check_owner(&caller, &plan.tenant_id, &plan.user_id)?;
    let saved = state.store.create_plan(plan).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

/// `GET /v1/memory/plans/{plan_id}?user_id=`.
pub async fn get_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(plan_id): Path<Uuid>,
    Query(query): Query<UserIdQuery>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    let plan = state.store.get_plan(&caller.tenant_id, &user_id, plan_id).await?;
    Ok(Json(plan))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlanStatusRequest {
    pub status: PlanStatus,
}

/// `PUT /v1/memory/plans/{plan_id}/status?user_id=`.
pub async fn update_plan_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(plan_id): Path<Uuid>,
    Query(query): Query<UserIdQuery>,
    Json(req): Json<UpdatePlanStatusRequest>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    let plan = state.store.update_plan_status(&caller.tenant_id, &user_id, plan_id, req.status).await?;
    Ok(Json(plan))
}

#[derive(Debug, Deserialize)]
pub struct ListPlansQuery {
    user_id: Option<String>,
    session_id: Option<Uuid>,
    status: Option<PlanStatus>,
}

/// `GET /v1/memory/plans?user_id=&session_id=&status=`.
pub async fn list_plans(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListPlansQuery>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    let plans = state.store.list_plans(&caller.tenant_id, &user_id, query.session_id, query.status).await?;
    Ok(Json(plans))
}

/// `POST /v1/memory/sessions`.
pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(session): Json<Session>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    check_owner(&caller, &session.tenant_id, &session.user_id)?;
    let saved = state.store.create_session(session).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

/// `GET /v1/memory/sessions/{session_id}?user_id=`.
pub async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
    Query(query): Query<UserIdQuery>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    let session = state.store.get_session(&caller.tenant_id, &user_id, session_id).await?;
    Ok(Json(session))
}

/// `GET /v1/memory/sessions?user_id=`.
pub async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserIdQuery>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let user_id = resolve_user(&caller, query.user_id.as_deref())?;
    let sessions = state.store.list_sessions(&caller.tenant_id, &user_id).await?;
    Ok(Json(sessions))
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

    fn caller(user_id: Option<&str>) -> CallerContext {
        CallerContext { tenant_id: "t1".to_string(), user_id: user_id.map(str::to_string) }
    }

    #[test]
    fn resolve_user_rejects_mismatched_query_param() {
        assert!(resolve_user(&caller(Some("u1")), Some("u2")).is_err());
        assert!(resolve_user(&caller(Some("u1")), Some("u1")).is_ok());
        assert!(resolve_user(&caller(Some("u1")), None).is_ok());
    }

    #[test]
    fn resolve_user_rejects_missing_identity() {
        assert!(resolve_user(&caller(None), None).is_err());
    }
}
