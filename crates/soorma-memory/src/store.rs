//! Storage abstraction for the Memory service (spec §4.4). Every method
//! takes `tenant_id`/`user_id` explicitly from the caller's
//! transport-extracted identity — implementations must never trust a
//! body-supplied tenant/user (spec: "never from the request body").

use async_trait::async_trait;
use serde_json::{Map, Value};
use soorma_types::Result;
use uuid::Uuid;

use crate::entities::{
    EpisodicMemory, LogInteractionRequest, Plan, PlanContext, PlanStatus, ProceduralMemory, ProcedureType, Session,
    SemanticMemory, TaskContext, UpsertKnowledgeRequest, UpsertKnowledgeResponse,
};

/// A scored search hit: the row plus its cosine similarity to the query.
pub type ScoredRow<T> = (T, f32);

#[async_trait]
pub trait MemoryStore: Send + Sync {
    // ---- Semantic memory ----

    async fn upsert_knowledge(
        &self,
        tenant_id: &str,
        user_id: &str,
        req: UpsertKnowledgeRequest,
        embedding: Option<Vec<f32>>,
    ) -> Result<UpsertKnowledgeResponse>;

    async fn search_knowledge(
        &self,
        tenant_id: &str,
        user_id: &str,
        query_embedding: &[f32],
        top_k: usize,
        include_public: bool,
    ) -> Result<Vec<ScoredRow<SemanticMemory>>>;

    async fn delete_knowledge(&self, tenant_id: &str, user_id: &str, id: Uuid) -> Result<()>;

    // ---- Episodic memory ----

    async fn log_interaction(
        &self,
        tenant_id: &str,
        user_id: &str,
        req: LogInteractionRequest,
        embedding: Option<Vec<f32>>,
    ) -> Result<EpisodicMemory>;

    async fn recent_interactions(
        &self,
        tenant_id: &str,
        user_id: &str,
        agent_id: &str,
        limit: usize,
    ) -> Result<Vec<EpisodicMemory>>;

    async fn search_interactions(
        &self,
        tenant_id: &str,
        user_id: &str,
        agent_id: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredRow<EpisodicMemory>>>;

    // ---- Procedural memory ----

    /// Store a reusable skill. Not named explicitly in spec §4.4 (which
    /// only specifies the read path); a write path is required for the
    /// read path to ever return anything.
    async fn save_skill(
        &self,
        tenant_id: &str,
        user_id: &str,
        agent_id: &str,
        trigger_condition: String,
        procedure_type: ProcedureType,
        content: String,
        embedding: Option<Vec<f32>>,
    ) -> Result<ProceduralMemory>;

    async fn get_relevant_skills(
        &self,
        tenant_id: &str,
        user_id: &str,
        agent_id: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredRow<ProceduralMemory>>>;

    // ---- Working memory ----

    async fn set_working(&self, tenant_id: &str, user_id: &str, plan_id: Uuid, key: String, value: Value) -> Result<()>;
    async fn get_working(&self, tenant_id: &str, user_id: &str, plan_id: Uuid, key: &str) -> Result<Value>;
    async fn delete_working(&self, tenant_id: &str, user_id: &str, plan_id: Uuid, key: &str) -> Result<()>;
    async fn delete_plan_working(&self, tenant_id: &str, user_id: &str, plan_id: Uuid) -> Result<u64>;

    // ---- Task contexts ----

    async fn save_task_context(&self, ctx: TaskContext) -> Result<TaskContext>;
    async fn get_task_context(&self, tenant_id: &str, user_id: &str, task_id: &str) -> Result<TaskContext>;
    async fn update_task_context(
        &self,
        tenant_id: &str,
        user_id: &str,
        task_id: &str,
        patch: Map<String, Value>,
    ) -> Result<TaskContext>;
    async fn delete_task_context(&self, tenant_id: &str, user_id: &str, task_id: &str) -> Result<()>;
    async fn get_task_by_subtask(&self, tenant_id: &str, user_id: &str, sub_task_id: &str) -> Result<TaskContext>;

    // ---- Plan contexts ----

    async fn save_plan_context(&self, ctx: PlanContext) -> Result<PlanContext>;
    async fn get_plan_context(&self, tenant_id: &str, user_id: &str, plan_id: Uuid) -> Result<PlanContext>;
    async fn update_plan_context(
        &self,
        tenant_id: &str,
        user_id: &str,
        plan_id: Uuid,
        patch: Map<String, Value>,
    ) -> Result<PlanContext>;
    async fn delete_plan_context(&self, tenant_id: &str, user_id: &str, plan_id: Uuid) -> Result<()>;
    async fn get_plan_context_by_correlation(
        &self,
        tenant_id: &str,
        user_id: &str,
        correlation_id: &str,
    ) -> Result<PlanContext>;

    // ---- Plans & sessions ----

    async fn create_plan(&self, plan: Plan) -> Result<Plan>;
    async fn get_plan(&self, tenant_id: &str, user_id: &str, plan_id: Uuid) -> Result<Plan>;
    async fn update_plan_status(&self, tenant_id: &str, user_id: &str, plan_id: Uuid, status: PlanStatus) -> Result<Plan>;
    async fn list_plans(
        &self,
        tenant_id: &str,
        user_id: &str,
        session_id: Option<Uuid>,
        status: Option<PlanStatus>,
    ) -> Result<Vec<Plan>>;

    async fn create_session(&self, session: Session) -> Result<Session>;
    async fn get_session(&self, tenant_id: &str, user_id: &str, session_id: Uuid) -> Result<Session>;
    async fn list_sessions(&self, tenant_id: &str, user_id: &str) -> Result<Vec<Session>>;
}
