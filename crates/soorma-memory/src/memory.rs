//! In-memory `MemoryStore` — the default backend for development and
//! tests. A real deployment uses [`crate::postgres::PostgresStore`] for
//! durability and row-level security; this backend exists so the Memory
//! service (and the agent runtime's fakes) can run without a database.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use soorma_types::{Result, SoormaError};
use uuid::Uuid;

use crate::embedding::{content_hash, cosine_similarity, dedup_by_content_hash};
use crate::entities::{
    EpisodicMemory, LogInteractionRequest, Plan, PlanContext, PlanStatus, ProceduralMemory, ProcedureType, Session,
    SemanticMemory, TaskContext, UpsertAction, UpsertKnowledgeRequest, UpsertKnowledgeResponse,
};
use crate::store::{MemoryStore, ScoredRow};

/// Volatile, process-local memory storage.
#[derive(Default)]
pub struct InMemoryStore {
    semantic: DashMap<Uuid, SemanticMemory>,
    episodic: DashMap<Uuid, EpisodicMemory>,
    procedural: DashMap<Uuid, ProceduralMemory>,
    working: DashMap<(String, String, Uuid, String), Value>,
    task_contexts: DashMap<(String, String, String), TaskContext>,
    plan_contexts: DashMap<(String, String, Uuid), PlanContext>,
    plans: DashMap<Uuid, Plan>,
    sessions: DashMap<Uuid, Session>,
}

impl InMemoryStore {
    /// Build an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn scope_for(user_id: &str, is_public: bool) -> String {
        if is_public {
            "public".to_string()
        } else {
            user_id.to_string()
        }
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn upsert_knowledge(
        &self,
        tenant_id: &str,
        user_id: &str,
        req: UpsertKnowledgeRequest,
        embedding: Option<Vec<f32>>,
    ) -> Result<UpsertKnowledgeResponse> {
        let hash = content_hash(&req.content);
        let scope = Self::scope_for(user_id, req.is_public);

        let existing = self.semantic.iter().find(|e| {
            let row = e.value();
            if row.tenant_id != tenant_id {
                return false;
            }
            if let Some(external_id) = &req.external_id {
                row.external_id.as_deref() == Some(external_id.as_str())
                    && Self::scope_for(&row.user_id, row.is_public) == scope
            } else {
                row.content_hash == hash && Self::scope_for(&row.user_id, row.is_public) == scope
            }
        });

        if let Some(existing) = existing {
            let id = existing.key().clone();
            drop(existing);
            let mut row = self.semantic.get_mut(&id).expect("row located above");
            let content_changed = row.content_hash != hash;
            let unchanged = !content_changed && row.metadata == req.metadata && row.is_public == req.is_public;
            if unchanged {
                return Ok(UpsertKnowledgeResponse { id, action: UpsertAction::DuplicateSkipped });
            }
            row.content = req.content;
            row.content_hash = hash;
            row.metadata = req.metadata;
            row.is_public = req.is_public;
            row.updated_at = Utc::now();
            if content_changed {
                row.embedding = embedding;
            }
            return Ok(UpsertKnowledgeResponse { id, action: UpsertAction::Updated });
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        self.semantic.insert(
            id,
            SemanticMemory {
                id,
                tenant_id: tenant_id.to_string(),
                user_id: user_id.to_string(),
                is_public: req.is_public,
                content: req.content,
                content_hash: hash,
                external_id: req.external_id,
                embedding,
                metadata: req.metadata,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(UpsertKnowledgeResponse { id, action: UpsertAction::Created })
    }

    async fn search_knowledge(
        &self,
        tenant_id: &str,
        user_id: &str,
        query_embedding: &[f32],
        top_k: usize,
        include_public: bool,
    ) -> Result<Vec<ScoredRow<SemanticMemory>>> {
        let hits: Vec<ScoredRow<SemanticMemory>> = self
            .semantic
            .iter()
            .map(|e| e.value().clone())
            .filter(|row| {
                row.tenant_id == tenant_id
                    && (row.user_id == user_id || (include_public && row.is_public))
            })
            .filter_map(|row| {
                let score = row.embedding.as_ref().map(|e| cosine_similarity(e, query_embedding))?;
                Some((row, score))
            })
            .collect();
        let mut hits = dedup_by_content_hash(hits, user_id);
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_knowledge(&self, tenant_id: &str, user_id: &str, id: Uuid) -> Result<()> {
        let row = self
            .semantic
            .get(&id)
            .ok_or_else(|| SoormaError::NotFound(format!("semantic memory {id} not found")))?;
        if row.tenant_id != tenant_id {
            return Err(SoormaError::NotFound(format!("semantic memory {id} not found")));
        }
        if row.user_id != user_id {
            return Err(SoormaError::Forbidden("cannot delete another user's semantic memory".into()));
        }
        drop(row);
        self.semantic.remove(&id);
        Ok(())
    }

    async fn log_interaction(
        &self,
        tenant_id: &str,
        user_id: &str,
        req: LogInteractionRequest,
        embedding: Option<Vec<f32>>,
    ) -> Result<EpisodicMemory> {
        let row = EpisodicMemory {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            agent_id: req.agent_id,
            role: req.role,
            content: req.content,
            embedding,
            occurred_at: Utc::now(),
        };
        self.episodic.insert(row.id, row.clone());
        Ok(row)
    }

    async fn recent_interactions(
        &self,
        tenant_id: &str,
        user_id: &str,
        agent_id: &str,
        limit: usize,
    ) -> Result<Vec<EpisodicMemory>> {
        let mut rows: Vec<EpisodicMemory> = self
            .episodic
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| r.tenant_id == tenant_id && r.user_id == user_id && r.agent_id == agent_id)
            .collect();
        rows.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn search_interactions(
        &self,
        tenant_id: &str,
        user_id: &str,
        agent_id: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredRow<EpisodicMemory>>> {
        let mut hits: Vec<ScoredRow<EpisodicMemory>> = self
            .episodic
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| r.tenant_id == tenant_id && r.user_id == user_id && r.agent_id == agent_id)
            .filter_map(|row| {
                let score = row.embedding.as_ref().map(|e| cosine_similarity(e, query_embedding))?;
                Some((row, score))
            })
            .collect();
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn save_skill(
        &self,
        tenant_id: &str,
        user_id: &str,
        agent_id: &str,
        trigger_condition: String,
        procedure_type: ProcedureType,
        content: String,
        embedding: Option<Vec<f32>>,
    ) -> Result<ProceduralMemory> {
        let row = ProceduralMemory {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
            trigger_condition,
            embedding,
            procedure_type,
            content,
        };
        self.procedural.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_relevant_skills(
        &self,
        tenant_id: &str,
        user_id: &str,
        agent_id: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredRow<ProceduralMemory>>> {
        let mut hits: Vec<ScoredRow<ProceduralMemory>> = self
            .procedural
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| r.tenant_id == tenant_id && r.user_id == user_id && r.agent_id == agent_id)
            .filter_map(|row| {
                let score = row.embedding.as_ref().map(|e| cosine_similarity(e, query_embedding))?;
                Some((row, score))
            })
            .collect();
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn set_working(&self, tenant_id: &str, user_id: &str, plan_id: Uuid, key: String, value: Value) -> Result<()> {
        self.working.insert((tenant_id.to_string(), user_id.to_string(), plan_id, key), value);
        Ok(())
    }

    async fn get_working(&self, tenant_id: &str, user_id: &str, plan_id: Uuid, key: &str) -> Result<Value> {
        self.working
            .get(&(tenant_id.to_string(), user_id.to_string(), plan_id, key.to_string()))
            .map(|v| v.value().clone())
            .ok_or_else(|| SoormaError::NotFound(format!("working key {key} not found for plan {plan_id}")))
    }

    async fn delete_working(&self, tenant_id: &str, user_id: &str, plan_id: Uuid, key: &str) -> Result<()> {
        self.working.remove(&(tenant_id.to_string(), user_id.to_string(), plan_id, key.to_string()));
        Ok(())
    }

    async fn delete_plan_working(&self, tenant_id: &str, user_id: &str, plan_id: Uuid) -> Result<u64> {
        let keys: Vec<_> = self
            .working
            .iter()
            .map(|e| e.key().clone())
            .filter(|(t, u, p, _)| t == tenant_id && u == user_id && *p == plan_id)
            .collect();
        let count = keys.len() as u64;
        for key in keys {
            self.working.remove(&key);
        }
        Ok(count)
    }

    async fn save_task_context(&self, ctx: TaskContext) -> Result<TaskContext> {
        let key = (ctx.tenant_id.clone(), ctx.user_id.clone(), ctx.task_id.clone());
        self.task_contexts.insert(key, ctx.clone());
        Ok(ctx)
    }

    async fn get_task_context(&self, tenant_id: &str, user_id: &str, task_id: &str) -> Result<TaskContext> {
        self.task_contexts
            .get(&(tenant_id.to_string(), user_id.to_string(), task_id.to_string()))
            .map(|e| e.value().clone())
            .ok_or_else(|| SoormaError::NotFound(format!("task context {task_id} not found")))
    }

    async fn update_task_context(
        &self,
        tenant_id: &str,
        user_id: &str,
        task_id: &str,
        patch: Map<String, Value>,
    ) -> Result<TaskContext> {
        let key = (tenant_id.to_string(), user_id.to_string(), task_id.to_string());
        let mut entry = self
            .task_contexts
            .get_mut(&key)
            .ok_or_else(|| SoormaError::NotFound(format!("task context {task_id} not found")))?;
        apply_task_patch(&mut entry, patch);
        Ok(entry.clone())
    }

    async fn delete_task_context(&self, tenant_id: &str, user_id: &str, task_id: &str) -> Result<()> {
        self.task_contexts.remove(&(tenant_id.to_string(), user_id.to_string(), task_id.to_string()));
        Ok(())
    }

    async fn get_task_by_subtask(&self, tenant_id: &str, user_id: &str, sub_task_id: &str) -> Result<TaskContext> {
        self.task_contexts
            .iter()
            .map(|e| e.value().clone())
            .find(|ctx| ctx.tenant_id == tenant_id && ctx.user_id == user_id && ctx.sub_tasks.contains_key(sub_task_id))
            .ok_or_else(|| SoormaError::NotFound(format!("no task context references sub-task {sub_task_id}")))
    }

    async fn save_plan_context(&self, ctx: PlanContext) -> Result<PlanContext> {
        let key = (ctx.tenant_id.clone(), ctx.user_id.clone(), ctx.plan_id);
        self.plan_contexts.insert(key, ctx.clone());
        Ok(ctx)
    }

    async fn get_plan_context(&self, tenant_id: &str, user_id: &str, plan_id: Uuid) -> Result<PlanContext> {
        self.plan_contexts
            .get(&(tenant_id.to_string(), user_id.to_string(), plan_id))
            .map(|e| e.value().clone())
            .ok_or_else(|| SoormaError::NotFound(format!("plan context {plan_id} not found")))
    }

    async fn update_plan_context(
        &self,
        tenant_id: &str,
        user_id: &str,
        plan_id: Uuid,
        patch: Map<String, Value>,
    ) -> Result<PlanContext> {
        let key = (tenant_id.to_string(), user_id.to_string(), plan_id);
        let mut entry = self
            .plan_contexts
            .get_mut(&key)
            .ok_or_else(|| SoormaError::NotFound(format!("plan context {plan_id} not found")))?;
        apply_plan_patch(&mut entry, patch)?;
        Ok(entry.clone())
    }

    async fn delete_plan_context(&self, tenant_id: &str, user_id: &str, plan_id: Uuid) -> Result<()> {
        self.plan_contexts.remove(&(tenant_id.to_string(), user_id.to_string(), plan_id));
        Ok(())
    }

    async fn get_plan_context_by_correlation(
        &self,
        tenant_id: &str,
        user_id: &str,
        correlation_id: &str,
    ) -> Result<PlanContext> {
        self.plan_contexts
            .iter()
            .map(|e| e.value().clone())
            .find(|ctx| ctx.tenant_id == tenant_id && ctx.user_id == user_id && ctx.correlation_id == correlation_id)
            .ok_or_else(|| SoormaError::NotFound(format!("no plan context with correlation {correlation_id}")))
    }

    async fn create_plan(&self, plan: Plan) -> Result<Plan> {
        self.plans.insert(plan.plan_id, plan.clone());
        Ok(plan)
    }

    async fn get_plan(&self, tenant_id: &str, user_id: &str, plan_id: Uuid) -> Result<Plan> {
        self.plans
            .get(&plan_id)
            .map(|e| e.value().clone())
            .filter(|p| p.tenant_id == tenant_id && p.user_id == user_id)
            .ok_or_else(|| SoormaError::NotFound(format!("plan {plan_id} not found")))
    }

    async fn update_plan_status(&self, tenant_id: &str, user_id: &str, plan_id: Uuid, status: PlanStatus) -> Result<Plan> {
        let mut entry = self
            .plans
            .get_mut(&plan_id)
            .filter(|p| p.tenant_id == tenant_id && p.user_id == user_id)
            .ok_or_else(|| SoormaError::NotFound(format!("plan {plan_id} not found")))?;
        entry.status = status;
        if matches!(status, PlanStatus::Completed | PlanStatus::Failed) {
            entry.ended_at = Some(Utc::now());
        }
        Ok(entry.clone())
    }

    async fn list_plans(
        &self,
        tenant_id: &str,
        user_id: &str,
        session_id: Option<Uuid>,
        status: Option<PlanStatus>,
    ) -> Result<Vec<Plan>> {
        Ok(self
            .plans
            .iter()
            .map(|e| e.value().clone())
            .filter(|p| p.tenant_id == tenant_id && p.user_id == user_id)
            .filter(|p| session_id.map(|s| p.session_id == Some(s)).unwrap_or(true))
            .filter(|p| status.map(|s| p.status == s).unwrap_or(true))
            .collect())
    }

    async fn create_session(&self, session: Session) -> Result<Session> {
        self.sessions.insert(session.session_id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, tenant_id: &str, user_id: &str, session_id: Uuid) -> Result<Session> {
        self.sessions
            .get(&session_id)
            .map(|e| e.value().clone())
            .filter(|s| s.tenant_id == tenant_id && s.user_id == user_id)
            .ok_or_else(|| SoormaError::NotFound(format!("session {session_id} not found")))
    }

    async fn list_sessions(&self, tenant_id: &str, user_id: &str) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .iter()
            .map(|e| e.value().clone())
            .filter(|s| s.tenant_id == tenant_id && s.user_id == user_id)
            .collect())
    }
}

fn apply_task_patch(ctx: &mut TaskContext, patch: Map<String, Value>) {
    for (key, value) in patch {
        match key.as_str() {
            "data" => ctx.data = value,
            "response_event" => ctx.response_event = value.as_str().map(str::to_string),
            "response_topic" => ctx.response_topic = value.as_str().map(str::to_string),
            "sub_tasks" => {
                if let Value::Object(map) = value {
                    ctx.sub_tasks.extend(map);
                }
            }
            "state" => {
                if let Value::Object(map) = value {
                    ctx.state.extend(map);
                }
            }
            _ => {}
        }
    }
}

fn apply_plan_patch(ctx: &mut PlanContext, patch: Map<String, Value>) -> Result<()> {
    for (key, value) in patch {
        match key.as_str() {
            "current_state" => {
                ctx.current_state = value
                    .as_str()
                    .ok_or_else(|| SoormaError::InvalidEnvelope("current_state patch must be a string".into()))?
                    .to_string();
            }
            "status" => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| SoormaError::InvalidEnvelope("status patch must be a string".into()))?;
                ctx.status = match raw {
                    "running" => PlanStatus::Running,
                    "paused" => PlanStatus::Paused,
                    "completed" => PlanStatus::Completed,
                    "failed" => PlanStatus::Failed,
                    other => return Err(SoormaError::InvalidEnvelope(format!("unknown plan status {other}"))),
                };
            }
            "results" => {
                if let (Value::Object(existing), Value::Object(incoming)) = (&mut ctx.results, value) {
                    existing.extend(incoming);
                } else {
                    ctx.results = value;
                }
            }
            "correlation_id" => {
                ctx.correlation_id = value
                    .as_str()
                    .ok_or_else(|| SoormaError::InvalidEnvelope("correlation_id patch must be a string".into()))?
                    .to_string();
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_knowledge_dedups_by_content_hash() {
        let store = InMemoryStore::new();
        let req = UpsertKnowledgeRequest { content: "hello".into(), metadata: json!({}), external_id: None, is_public: false };
        let first = store.upsert_knowledge("t1", "u1", req.clone(), Some(vec![1.0, 0.0])).await.unwrap();
        assert_eq!(first.action, UpsertAction::Created);
        let second = store.upsert_knowledge("t1", "u1", req, Some(vec![1.0, 0.0])).await.unwrap();
        assert_eq!(second.action, UpsertAction::DuplicateSkipped);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn upsert_knowledge_prefers_external_id_over_content_hash() {
        let store = InMemoryStore::new();
        let first = store
            .upsert_knowledge(
                "t1",
                "u1",
                UpsertKnowledgeRequest { content: "v1".into(), metadata: json!({}), external_id: Some("doc-1".into()), is_public: false },
                Some(vec![1.0]),
            )
            .await
            .unwrap();
        let second = store
            .upsert_knowledge(
                "t1",
                "u1",
                UpsertKnowledgeRequest { content: "v2".into(), metadata: json!({}), external_id: Some("doc-1".into()), is_public: false },
                Some(vec![0.5]),
            )
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.action, UpsertAction::Updated);
    }

    #[tokio::test]
    async fn search_knowledge_excludes_other_users_private_rows() {
        let store = InMemoryStore::new();
        store
            .upsert_knowledge(
                "t1",
                "u1",
                UpsertKnowledgeRequest { content: "secret".into(), metadata: json!({}), external_id: None, is_public: false },
                Some(vec![1.0, 0.0]),
            )
            .await
            .unwrap();
        let hits = store.search_knowledge("t1", "u2", &[1.0, 0.0], 10, true).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_knowledge_includes_public_rows_across_users() {
        let store = InMemoryStore::new();
        store
            .upsert_knowledge(
                "t1",
                "u1",
                UpsertKnowledgeRequest { content: "shared".into(), metadata: json!({}), external_id: None, is_public: true },
                Some(vec![1.0, 0.0]),
            )
            .await
            .unwrap();
        let hits = store.search_knowledge("t1", "u2", &[1.0, 0.0], 10, true).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn search_knowledge_prefers_callers_private_row_over_public_duplicate() {
        let store = InMemoryStore::new();
        store
            .upsert_knowledge(
                "t1",
                "u1",
                UpsertKnowledgeRequest { content: "dup".into(), metadata: json!({}), external_id: None, is_public: true },
                Some(vec![1.0, 0.0]),
            )
            .await
            .unwrap();
        store
            .upsert_knowledge(
                "t1",
                "u2",
                UpsertKnowledgeRequest { content: "dup".into(), metadata: json!({}), external_id: None, is_public: false },
                Some(vec![1.0, 0.0]),
            )
            .await
            .unwrap();
        let hits = store.search_knowledge("t1", "u2", &[1.0, 0.0], 10, true).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.user_id, "u2");
        assert!(!hits[0].0.is_public);
    }

    #[tokio::test]
    async fn delete_knowledge_rejects_cross_user_delete() {
        let store = InMemoryStore::new();
        let created = store
            .upsert_knowledge(
                "t1",
                "u1",
                UpsertKnowledgeRequest { content: "mine".into(), metadata: json!({}), external_id: None, is_public: false },
                None,
            )
            .await
            .unwrap();
        let err = store.delete_knowledge("t1", "u2", created.id).await.unwrap_err();
        assert!(matches!(err, SoormaError::Forbidden(_)));
    }

    #[tokio::test]
    async fn task_context_round_trips_and_supports_subtask_lookup() {
        let store = InMemoryStore::new();
        let mut sub_tasks = Map::new();
        sub_tasks.insert("corr-1".into(), json!({"spec": "inventory.reserve.requested"}));
        let ctx = TaskContext {
            tenant_id: "t1".into(),
            user_id: "u1".into(),
            agent_id: "worker".into(),
            task_id: "task-T".into(),
            plan_id: None,
            event_type: "order.fulfill.requested".into(),
            data: json!({}),
            response_event: Some("order.fulfill.done".into()),
            response_topic: None,
            sub_tasks,
            state: Map::new(),
        };
        store.save_task_context(ctx).await.unwrap();

        let found = store.get_task_by_subtask("t1", "u1", "corr-1").await.unwrap();
        assert_eq!(found.task_id, "task-T");
    }

    #[tokio::test]
    async fn plan_context_lookup_by_correlation() {
        let store = InMemoryStore::new();
        let plan_id = Uuid::new_v4();
        let ctx = PlanContext {
            tenant_id: "t1".into(),
            user_id: "u1".into(),
            plan_id,
            goal_event: "goal".into(),
            goal_data: json!({}),
            state_machine: json!({}),
            current_state: "awaiting_approval".into(),
            results: json!({}),
            status: PlanStatus::Paused,
            correlation_id: plan_id.to_string(),
        };
        store.save_plan_context(ctx).await.unwrap();
        let found = store.get_plan_context_by_correlation("t1", "u1", &plan_id.to_string()).await.unwrap();
        assert_eq!(found.plan_id, plan_id);
    }

    #[tokio::test]
    async fn working_memory_set_get_delete() {
        let store = InMemoryStore::new();
        let plan_id = Uuid::new_v4();
        store.set_working("t1", "u1", plan_id, "k".into(), json!(42)).await.unwrap();
        assert_eq!(store.get_working("t1", "u1", plan_id, "k").await.unwrap(), json!(42));
        store.delete_working("t1", "u1", plan_id, "k").await.unwrap();
        assert!(store.get_working("t1", "u1", plan_id, "k").await.is_err());
    }
}
