//! Memory client surface (spec §4.4): semantic/episodic/procedural/working
//! memory plus task/plan/session context, against the Memory service's
//! `/v1/memory/*` HTTP surface (spec §6.2).

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use uuid::Uuid;

use crate::entities::{
    EpisodicMemory, LogInteractionRequest, Plan, PlanContext, ProceduralMemory, Session, SemanticMemory, TaskContext,
    UpsertKnowledgeRequest, UpsertKnowledgeResponse,
};
use crate::error::RuntimeError;
use crate::identity::Identity;
use crate::transport::{ok_or_api_error, parse_json_response};

/// A row paired with its similarity score, as returned by the semantic
/// search endpoints.
pub type ScoredRow<T> = (T, f32);

/// The Memory surface an agent links against (spec §4.4). Unlike the
/// storage-layer trait this mirrors, every method is implicitly scoped to
/// the client's own [`Identity`] — no `tenant_id`/`user_id` parameters.
#[async_trait]
pub trait MemoryClient: Send + Sync {
    // ---- semantic memory ----
    async fn upsert_knowledge(&self, request: UpsertKnowledgeRequest) -> Result<UpsertKnowledgeResponse, RuntimeError>;
    async fn search_semantic(&self, query: &str, limit: usize, include_public: bool) -> Result<Vec<ScoredRow<SemanticMemory>>, RuntimeError>;
    async fn delete_semantic(&self, id: Uuid) -> Result<(), RuntimeError>;

    // ---- episodic memory ----
    async fn log_interaction(&self, request: LogInteractionRequest) -> Result<EpisodicMemory, RuntimeError>;
    async fn recent_episodes(&self, limit: usize) -> Result<Vec<EpisodicMemory>, RuntimeError>;
    async fn search_episodic(&self, query: &str, limit: usize) -> Result<Vec<ScoredRow<EpisodicMemory>>, RuntimeError>;

    // ---- procedural memory ----
    async fn relevant_skills(&self, trigger: &str, limit: usize) -> Result<Vec<ScoredRow<ProceduralMemory>>, RuntimeError>;

    // ---- working memory (task/plan scoped key-value) ----
    async fn set_working(&self, plan_id: Uuid, key: &str, value: Value) -> Result<(), RuntimeError>;
    async fn get_working(&self, plan_id: Uuid, key: &str) -> Result<Option<Value>, RuntimeError>;
    async fn delete_working_key(&self, plan_id: Uuid, key: &str) -> Result<(), RuntimeError>;
    async fn clear_working(&self, plan_id: Uuid) -> Result<(), RuntimeError>;

    // ---- task context (spec §4.5) ----
    async fn save_task_context(&self, context: TaskContext) -> Result<(), RuntimeError>;
    async fn get_task_context(&self, task_id: &str) -> Result<Option<TaskContext>, RuntimeError>;
    async fn update_task_context(&self, task_id: &str, patch: Value) -> Result<TaskContext, RuntimeError>;
    async fn delete_task_context(&self, task_id: &str) -> Result<(), RuntimeError>;
    async fn get_task_context_by_sub_task(&self, sub_task_id: &str) -> Result<Option<TaskContext>, RuntimeError>;

    // ---- plan context (spec §4.5/§4.6) ----
    async fn save_plan_context(&self, context: PlanContext) -> Result<(), RuntimeError>;
    async fn get_plan_context(&self, plan_id: Uuid) -> Result<Option<PlanContext>, RuntimeError>;
    async fn update_plan_context(&self, plan_id: Uuid, patch: Value) -> Result<PlanContext, RuntimeError>;
    async fn delete_plan_context(&self, plan_id: Uuid) -> Result<(), RuntimeError>;
    async fn get_plan_context_by_correlation(&self, correlation_id: &str) -> Result<Option<PlanContext>, RuntimeError>;

    // ---- plans & sessions (durable history, spec §3.3) ----
    async fn create_plan(&self, plan: Plan) -> Result<Plan, RuntimeError>;
    async fn list_plans(&self, session_id: Option<Uuid>) -> Result<Vec<Plan>, RuntimeError>;
    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>, RuntimeError>;
    async fn set_plan_status(&self, plan_id: Uuid, status: crate::entities::PlanStatus) -> Result<Plan, RuntimeError>;

    async fn create_session(&self, session: Session) -> Result<Session, RuntimeError>;
    async fn list_sessions(&self) -> Result<Vec<Session>, RuntimeError>;
    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, RuntimeError>;
}

/// Real HTTP implementation of [`MemoryClient`].
pub struct HttpMemoryClient {
    http: Client,
    base_url: String,
    identity: Identity,
}

impl HttpMemoryClient {
    pub fn new(base_url: impl Into<String>, identity: Identity) -> Self {
        Self { http: Client::new(), base_url: base_url.into(), identity }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `GET`, translating a 404 into `Ok(None)` instead of an error — the
    /// shape every "maybe absent" lookup below shares.
    async fn get_optional<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<Option<T>, RuntimeError> {
        let response = self.identity.apply(self.http.get(url)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(parse_json_response(response).await?))
    }
}

#[async_trait]
impl MemoryClient for HttpMemoryClient {
    async fn upsert_knowledge(&self, request: UpsertKnowledgeRequest) -> Result<UpsertKnowledgeResponse, RuntimeError> {
        let url = self.url("/v1/memory/semantic");
        let response = self.identity.apply(self.http.post(&url).json(&request)).send().await?;
        parse_json_response(response).await
    }

    async fn search_semantic(&self, query: &str, limit: usize, include_public: bool) -> Result<Vec<ScoredRow<SemanticMemory>>, RuntimeError> {
        let url = self.url("/v1/memory/semantic/search");
        let request = self
            .identity
            .apply(self.http.get(&url))
            .query(&[("q", query), ("limit", &limit.to_string()), ("include_public", &include_public.to_string())]);
        let response = request.send().await?;
        parse_json_response(response).await
    }

    async fn delete_semantic(&self, id: Uuid) -> Result<(), RuntimeError> {
        let url = self.url(&format!("/v1/memory/semantic/{id}"));
        let response = self.identity.apply(self.http.delete(&url)).send().await?;
        ok_or_api_error(response).await
    }

    async fn log_interaction(&self, request: LogInteractionRequest) -> Result<EpisodicMemory, RuntimeError> {
        let url = self.url("/v1/memory/episodic");
        let response = self.identity.apply(self.http.post(&url).json(&request)).send().await?;
        parse_json_response(response).await
    }

    async fn recent_episodes(&self, limit: usize) -> Result<Vec<EpisodicMemory>, RuntimeError> {
        let url = self.url("/v1/memory/episodic/recent");
        let request = self.identity.apply(self.http.get(&url)).query(&[("limit", limit.to_string())]);
        let response = request.send().await?;
        parse_json_response(response).await
    }

    async fn search_episodic(&self, query: &str, limit: usize) -> Result<Vec<ScoredRow<EpisodicMemory>>, RuntimeError> {
        let url = self.url("/v1/memory/episodic/search");
        let request = self.identity.apply(self.http.get(&url)).query(&[("q", query), ("limit", &limit.to_string())]);
        let response = request.send().await?;
        parse_json_response(response).await
    }

    async fn relevant_skills(&self, trigger: &str, limit: usize) -> Result<Vec<ScoredRow<ProceduralMemory>>, RuntimeError> {
        let url = self.url("/v1/memory/procedural/context");
        let request = self.identity.apply(self.http.get(&url)).query(&[("trigger", trigger), ("limit", &limit.to_string())]);
        let response = request.send().await?;
        parse_json_response(response).await
    }

    async fn set_working(&self, plan_id: Uuid, key: &str, value: Value) -> Result<(), RuntimeError> {
        let url = self.url(&format!("/v1/memory/working/{plan_id}/{key}"));
        let response = self.identity.apply(self.http.put(&url).json(&value)).send().await?;
        ok_or_api_error(response).await
    }

    async fn get_working(&self, plan_id: Uuid, key: &str) -> Result<Option<Value>, RuntimeError> {
        let url = self.url(&format!("/v1/memory/working/{plan_id}/{key}"));
        self.get_optional(&url).await
    }

    async fn delete_working_key(&self, plan_id: Uuid, key: &str) -> Result<(), RuntimeError> {
        let url = self.url(&format!("/v1/memory/working/{plan_id}/{key}"));
        let response = self.identity.apply(self.http.delete(&url)).send().await?;
        ok_or_api_error(response).await
    }

    async fn clear_working(&self, plan_id: Uuid) -> Result<(), RuntimeError> {
        let url = self.url(&format!("/v1/memory/working/{plan_id}"));
        let response = self.identity.apply(self.http.delete(&url)).send().await?;
        ok_or_api_error(response).await
    }

    async fn save_task_context(&self, context: TaskContext) -> Result<(), RuntimeError> {
        let url = self.url("/v1/memory/tasks");
        let response = self.identity.apply(self.http.post(&url).json(&context)).send().await?;
        ok_or_api_error(response).await
    }

    async fn get_task_context(&self, task_id: &str) -> Result<Option<TaskContext>, RuntimeError> {
        let url = self.url(&format!("/v1/memory/tasks/{task_id}"));
        self.get_optional(&url).await
    }

    async fn update_task_context(&self, task_id: &str, patch: Value) -> Result<TaskContext, RuntimeError> {
        let url = self.url(&format!("/v1/memory/tasks/{task_id}"));
        let response = self.identity.apply(self.http.patch(&url).json(&patch)).send().await?;
        parse_json_response(response).await
    }

    async fn delete_task_context(&self, task_id: &str) -> Result<(), RuntimeError> {
        let url = self.url(&format!("/v1/memory/tasks/{task_id}"));
        let response = self.identity.apply(self.http.delete(&url)).send().await?;
        ok_or_api_error(response).await
    }

    async fn get_task_context_by_sub_task(&self, sub_task_id: &str) -> Result<Option<TaskContext>, RuntimeError> {
        let url = self.url(&format!("/v1/memory/tasks/by-subtask/{sub_task_id}"));
        self.get_optional(&url).await
    }

    async fn save_plan_context(&self, context: PlanContext) -> Result<(), RuntimeError> {
        let url = self.url("/v1/memory/plans/context");
        let response = self.identity.apply(self.http.post(&url).json(&context)).send().await?;
        ok_or_api_error(response).await
    }

    async fn get_plan_context(&self, plan_id: Uuid) -> Result<Option<PlanContext>, RuntimeError> {
        let url = self.url(&format!("/v1/memory/plans/{plan_id}/context"));
        self.get_optional(&url).await
    }

    async fn update_plan_context(&self, plan_id: Uuid, patch: Value) -> Result<PlanContext, RuntimeError> {
        let url = self.url(&format!("/v1/memory/plans/{plan_id}/context"));
        let response = self.identity.apply(self.http.patch(&url).json(&patch)).send().await?;
        parse_json_response(response).await
    }

    async fn delete_plan_context(&self, plan_id: Uuid) -> Result<(), RuntimeError> {
        let url = self.url(&format!("/v1/memory/plans/{plan_id}/context"));
        let response = self.identity.apply(self.http.delete(&url)).send().await?;
        ok_or_api_error(response).await
    }

    async fn get_plan_context_by_correlation(&self, correlation_id: &str) -> Result<Option<PlanContext>, RuntimeError> {
        let url = self.url(&format!("/v1/memory/plans/context/by-correlation/{correlation_id}"));
        self.get_optional(&url).await
    }

    async fn create_plan(&self, plan: Plan) -> Result<Plan, RuntimeError> {
        let url = self.url("/v1/memory/plans");
        let response = self.identity.apply(self.http.post(&url).json(&plan)).send().await?;
        parse_json_response(response).await
    }

    async fn list_plans(&self, session_id: Option<Uuid>) -> Result<Vec<Plan>, RuntimeError> {
        let url = self.url("/v1/memory/plans");
        let mut request = self.identity.apply(self.http.get(&url));
        if let Some(session_id) = session_id {
            request = request.query(&[("session_id", session_id.to_string())]);
        }
        let response = request.send().await?;
        parse_json_response(response).await
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>, RuntimeError> {
        let url = self.url(&format!("/v1/memory/plans/{plan_id}"));
        self.get_optional(&url).await
    }

    async fn set_plan_status(&self, plan_id: Uuid, status: crate::entities::PlanStatus) -> Result<Plan, RuntimeError> {
        let url = self.url(&format!("/v1/memory/plans/{plan_id}/status"));
        let response = self.identity.apply(self.http.put(&url).json(&status)).send().await?;
        parse_json_response(response).await
    }

    async fn create_session(&self, session: Session) -> Result<Session, RuntimeError> {
        let url = self.url("/v1/memory/sessions");
        let response = self.identity.apply(self.http.post(&url).json(&session)).send().await?;
        parse_json_response(response).await
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, RuntimeError> {
        let url = self.url("/v1/memory/sessions");
        let response = self.identity.apply(self.http.get(&url)).send().await?;
        parse_json_response(response).await
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, RuntimeError> {
        let url = self.url(&format!("/v1/memory/sessions/{session_id}"));
        self.get_optional(&url).await
    }
}
