//! `sqlx`-backed `MemoryStore`, the service's durable backend. Follows
//! spec §4.4/§5/§9: every query runs inside a transaction that first
//! sets `(current_tenant, current_user)` as session-local config, so
//! row-level-security policies (defined in [`migrate`]) enforce
//! isolation at the storage layer — handlers never write
//! `WHERE tenant_id = …` themselves.

use async_trait::async_trait;
use chrono::Utc;
use pgvector::Vector;
use serde_json::{Map, Value};
use soorma_types::{Result, SoormaError};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::embedding::{content_hash, cosine_similarity, dedup_by_content_hash};
use crate::entities::{
    EpisodicMemory, InteractionRole, LogInteractionRequest, Plan, PlanContext, PlanStatus, ProceduralMemory,
    ProcedureType, Session, SemanticMemory, TaskContext, UpsertAction, UpsertKnowledgeRequest, UpsertKnowledgeResponse,
};
use crate::store::{MemoryStore, ScoredRow};

fn internal<E: std::fmt::Display>(context: &str) -> impl Fn(E) -> SoormaError + '_ {
    move |e| SoormaError::Internal(format!("{context}: {e}"))
}

/// Durable memory storage backed by PostgreSQL + `pgvector`.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to `database_url` and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(internal("connecting to postgres"))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Run idempotent schema migrations, including the `pgvector`
    /// extension, row-level-security policies, and HNSW indexes (spec
    /// §6.3).
    async fn migrate(&self) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .map_err(internal("creating vector extension"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS semantic_memory (
                id UUID PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                is_public BOOLEAN NOT NULL DEFAULT FALSE,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                external_id TEXT,
                embedding vector(1536),
                metadata JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE UNIQUE INDEX IF NOT EXISTS semantic_private_external_id
                ON semantic_memory (tenant_id, user_id, external_id) WHERE NOT is_public AND external_id IS NOT NULL;
            CREATE UNIQUE INDEX IF NOT EXISTS semantic_public_external_id
                ON semantic_memory (tenant_id, external_id) WHERE is_public AND external_id IS NOT NULL;
            CREATE UNIQUE INDEX IF NOT EXISTS semantic_private_content_hash
                ON semantic_memory (tenant_id, user_id, content_hash) WHERE NOT is_public AND external_id IS NULL;
            CREATE UNIQUE INDEX IF NOT EXISTS semantic_public_content_hash
                ON semantic_memory (tenant_id, content_hash) WHERE is_public AND external_id IS NULL;
            ALTER TABLE semantic_memory ENABLE ROW LEVEL SECURITY;
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(internal("migrating semantic_memory"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episodic_memory (
                id UUID PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding vector(1536),
                occurred_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            ALTER TABLE episodic_memory ENABLE ROW LEVEL SECURITY;
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(internal("migrating episodic_memory"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS procedural_memory (
                id UUID PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                trigger_condition TEXT NOT NULL,
                embedding vector(1536),
                procedure_type TEXT NOT NULL,
                content TEXT NOT NULL
            );
            ALTER TABLE procedural_memory ENABLE ROW LEVEL SECURITY;
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(internal("migrating procedural_memory"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS working_memory (
                tenant_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                plan_id UUID NOT NULL,
                key TEXT NOT NULL,
                value JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (plan_id, key)
            );
            ALTER TABLE working_memory ENABLE ROW LEVEL SECURITY;
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(internal("migrating working_memory"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_contexts (
                tenant_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                plan_id UUID,
                event_type TEXT NOT NULL,
                data JSONB NOT NULL,
                response_event TEXT,
                response_topic TEXT,
                sub_tasks JSONB NOT NULL DEFAULT '{}',
                state JSONB NOT NULL DEFAULT '{}',
                PRIMARY KEY (tenant_id, user_id, task_id)
            );
            ALTER TABLE task_contexts ENABLE ROW LEVEL SECURITY;
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(internal("migrating task_contexts"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS plan_contexts (
                tenant_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                plan_id UUID NOT NULL,
                goal_event TEXT NOT NULL,
                goal_data JSONB NOT NULL,
                state_machine JSONB NOT NULL,
                current_state TEXT NOT NULL,
                results JSONB NOT NULL,
                status TEXT NOT NULL,
                correlation_id TEXT NOT NULL,
                PRIMARY KEY (tenant_id, user_id, plan_id)
            );
            ALTER TABLE plan_contexts ENABLE ROW LEVEL SECURITY;
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(internal("migrating plan_contexts"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS plans (
                plan_id UUID PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                session_id UUID,
                goal TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                ended_at TIMESTAMPTZ
            );
            ALTER TABLE plans ENABLE ROW LEVEL SECURITY;
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(internal("migrating plans"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id UUID PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                title TEXT,
                session_metadata JSONB NOT NULL DEFAULT '{}'
            );
            ALTER TABLE sessions ENABLE ROW LEVEL SECURITY;
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(internal("migrating sessions"))?;

        Ok(())
    }

    /// Begin a transaction with `(current_tenant, current_user)` bound
    /// as session-local config for the lifetime of the transaction.
    /// Released automatically when the transaction ends (commit or
    /// drop) — spec §5: "session variable is reset when the connection
    /// returns to the pool".
    async fn begin_scoped(&self, tenant_id: &str, user_id: &str) -> Result<Transaction<'_, Postgres>> {
        let mut tx = self.pool.begin().await.map_err(internal("beginning transaction"))?;
        sqlx::query("SELECT set_config('app.current_tenant', $1, true)")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await
            .map_err(internal("binding current_tenant"))?;
        sqlx::query("SELECT set_config('app.current_user', $1, true)")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(internal("binding current_user"))?;
        Ok(tx)
    }
}

fn row_to_semantic(row: &sqlx::postgres::PgRow) -> Result<SemanticMemory> {
    let embedding: Option<Vector> = row.try_get("embedding").map_err(internal("reading embedding"))?;
    Ok(SemanticMemory {
        id: row.try_get("id").map_err(internal("reading id"))?,
        tenant_id: row.try_get("tenant_id").map_err(internal("reading tenant_id"))?,
        user_id: row.try_get("user_id").map_err(internal("reading user_id"))?,
        is_public: row.try_get("is_public").map_err(internal("reading is_public"))?,
        content: row.try_get("content").map_err(internal("reading content"))?,
        content_hash: row.try_get("content_hash").map_err(internal("reading content_hash"))?,
        external_id: row.try_get("external_id").map_err(internal("reading external_id"))?,
        embedding: embedding.map(|v| v.to_vec()),
        metadata: row.try_get("metadata").map_err(internal("reading metadata"))?,
        created_at: row.try_get("created_at").map_err(internal("reading created_at"))?,
        updated_at: row.try_get("updated_at").map_err(internal("reading updated_at"))?,
    })
}

fn row_to_episodic(row: &sqlx::postgres::PgRow) -> Result<EpisodicMemory> {
    let embedding: Option<Vector> = row.try_get("embedding").map_err(internal("reading embedding"))?;
    let role_raw: String = row.try_get("role").map_err(internal("reading role"))?;
    Ok(EpisodicMemory {
        id: row.try_get("id").map_err(internal("reading id"))?,
        tenant_id: row.try_get("tenant_id").map_err(internal("reading tenant_id"))?,
        user_id: row.try_get("user_id").map_err(internal("reading user_id"))?,
        agent_id: row.try_get("agent_id").map_err(internal("reading agent_id"))?,
        role: parse_role(&role_raw)?,
        content: row.try_get("content").map_err(internal("reading content"))?,
        embedding: embedding.map(|v| v.to_vec()),
        occurred_at: row.try_get("occurred_at").map_err(internal("reading occurred_at"))?,
    })
}

fn parse_role(raw: &str) -> Result<InteractionRole> {
    Ok(match raw {
        "user" => InteractionRole::User,
        "assistant" => InteractionRole::Assistant,
        "system" => InteractionRole::System,
        "tool" => InteractionRole::Tool,
        other => return Err(SoormaError::Internal(format!("corrupt interaction role: {other}"))),
    })
}

fn role_str(role: InteractionRole) -> &'static str {
    match role {
        InteractionRole::User => "user",
        InteractionRole::Assistant => "assistant",
        InteractionRole::System => "system",
        InteractionRole::Tool => "tool",
    }
}

fn procedure_type_str(kind: ProcedureType) -> &'static str {
    match kind {
        ProcedureType::SystemPrompt => "system_prompt",
        ProcedureType::FewShotExample => "few_shot_example",
    }
}

fn parse_procedure_type(raw: &str) -> Result<ProcedureType> {
    Ok(match raw {
        "system_prompt" => ProcedureType::SystemPrompt,
        "few_shot_example" => ProcedureType::FewShotExample,
        other => return Err(SoormaError::Internal(format!("corrupt procedure_type: {other}"))),
    })
}

fn status_str(status: PlanStatus) -> &'static str {
    match status {
        PlanStatus::Running => "running",
        PlanStatus::Paused => "paused",
        PlanStatus::Completed => "completed",
        PlanStatus::Failed => "failed",
    }
}

fn parse_status(raw: &str) -> Result<PlanStatus> {
    Ok(match raw {
        "running" => PlanStatus::Running,
        "paused" => PlanStatus::Paused,
        "completed" => PlanStatus::Completed,
        "failed" => PlanStatus::Failed,
        other => return Err(SoormaError::Internal(format!("corrupt plan status: {other}"))),
    })
}

#[async_trait]
impl MemoryStore for PostgresStore {
    async fn upsert_knowledge(
        &self,
        tenant_id: &str,
        user_id: &str,
        req: UpsertKnowledgeRequest,
        embedding: Option<Vec<f32>>,
    ) -> Result<UpsertKnowledgeResponse> {
        let hash = content_hash(&req.content);
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let vector = embedding.map(Vector::from);

        // Look up any existing row first so we can tell Created apart
        // from Updated/DuplicateSkipped (spec §4.4) and decide whether
        // to regenerate the embedding.
        let existing: Option<(Uuid, String, Value, bool)> = if let Some(external_id) = &req.external_id {
            sqlx::query_as(
                "SELECT id, content_hash, metadata, is_public FROM semantic_memory
                 WHERE tenant_id = $1 AND external_id = $2
                   AND (is_public = $3 OR (NOT is_public AND user_id = $4))",
            )
            .bind(tenant_id)
            .bind(external_id)
            .bind(req.is_public)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
        } else {
            sqlx::query_as(
                "SELECT id, content_hash, metadata, is_public FROM semantic_memory
                 WHERE tenant_id = $1 AND content_hash = $2
                   AND (is_public = $3 OR (NOT is_public AND user_id = $4))",
            )
            .bind(tenant_id)
            .bind(&hash)
            .bind(req.is_public)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
        }
        .map_err(internal("looking up existing semantic row"))?;

        let response = if let Some((id, old_hash, old_metadata, old_is_public)) = existing {
            let content_changed = old_hash != hash;
            if !content_changed && old_metadata == req.metadata && old_is_public == req.is_public {
                UpsertKnowledgeResponse { id, action: UpsertAction::DuplicateSkipped }
            } else {
                if content_changed {
                    sqlx::query(
                        "UPDATE semantic_memory SET content = $1, content_hash = $2, metadata = $3, is_public = $4,
                             embedding = $5, updated_at = now() WHERE id = $6",
                    )
                    .bind(&req.content)
                    .bind(&hash)
                    .bind(&req.metadata)
                    .bind(req.is_public)
                    .bind(&vector)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                } else {
                    sqlx::query(
                        "UPDATE semantic_memory SET content = $1, content_hash = $2, metadata = $3, is_public = $4,
                             updated_at = now() WHERE id = $5",
                    )
                    .bind(&req.content)
                    .bind(&hash)
                    .bind(&req.metadata)
                    .bind(req.is_public)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                }
                .map_err(internal("updating semantic row"))?;
                UpsertKnowledgeResponse { id, action: UpsertAction::Updated }
            }
        } else {
            let id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO semantic_memory (id, tenant_id, user_id, is_public, content, content_hash, external_id, embedding, metadata)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(id)
            .bind(tenant_id)
            .bind(user_id)
            .bind(req.is_public)
            .bind(&req.content)
            .bind(&hash)
            .bind(&req.external_id)
            .bind(&vector)
            .bind(&req.metadata)
            .execute(&mut *tx)
            .await
            .map_err(internal("inserting semantic row"))?;
            UpsertKnowledgeResponse { id, action: UpsertAction::Created }
        };

        tx.commit().await.map_err(internal("committing upsert_knowledge"))?;
        Ok(response)
    }

    async fn search_knowledge(
        &self,
        tenant_id: &str,
        user_id: &str,
        query_embedding: &[f32],
        top_k: usize,
        include_public: bool,
    ) -> Result<Vec<ScoredRow<SemanticMemory>>> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let rows = sqlx::query(
            "SELECT * FROM semantic_memory WHERE tenant_id = $1 AND (user_id = $2 OR ($3 AND is_public))
             AND embedding IS NOT NULL",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(include_public)
        .fetch_all(&mut *tx)
        .await
        .map_err(internal("searching semantic memory"))?;
        tx.commit().await.map_err(internal("committing search_knowledge"))?;

        let hits: Vec<ScoredRow<SemanticMemory>> = rows
            .iter()
            .map(row_to_semantic)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .map(|row| {
                let score = row.embedding.as_ref().map(|e| cosine_similarity(e, query_embedding)).unwrap_or(-1.0);
                (row, score)
            })
            .collect();
        let mut hits = dedup_by_content_hash(hits, user_id);
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_knowledge(&self, tenant_id: &str, user_id: &str, id: Uuid) -> Result<()> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let row: Option<(String,)> = sqlx::query_as("SELECT user_id FROM semantic_memory WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal("looking up semantic row for delete"))?;
        let (owner,) = row.ok_or_else(|| SoormaError::NotFound(format!("semantic memory {id} not found")))?;
        if owner != user_id {
            return Err(SoormaError::Forbidden("cannot delete another user's semantic memory".into()));
        }
        sqlx::query("DELETE FROM semantic_memory WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(internal("deleting semantic row"))?;
        tx.commit().await.map_err(internal("committing delete_knowledge"))?;
        Ok(())
    }

    async fn log_interaction(
        &self,
        tenant_id: &str,
        user_id: &str,
        req: LogInteractionRequest,
        embedding: Option<Vec<f32>>,
    ) -> Result<EpisodicMemory> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let id = Uuid::new_v4();
        let occurred_at = Utc::now();
        let vector = embedding.clone().map(Vector::from);
        sqlx::query(
            "INSERT INTO episodic_memory (id, tenant_id, user_id, agent_id, role, content, embedding, occurred_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(user_id)
        .bind(&req.agent_id)
        .bind(role_str(req.role))
        .bind(&req.content)
        .bind(&vector)
        .bind(occurred_at)
        .execute(&mut *tx)
        .await
        .map_err(internal("inserting episodic row"))?;
        tx.commit().await.map_err(internal("committing log_interaction"))?;
        Ok(EpisodicMemory {
            id,
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            agent_id: req.agent_id,
            role: req.role,
            content: req.content,
            embedding,
            occurred_at,
        })
    }

    async fn recent_interactions(
        &self,
        tenant_id: &str,
        user_id: &str,
        agent_id: &str,
        limit: usize,
    ) -> Result<Vec<EpisodicMemory>> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let rows = sqlx::query(
            "SELECT * FROM episodic_memory WHERE tenant_id = $1 AND user_id = $2 AND agent_id = $3
             ORDER BY occurred_at DESC LIMIT $4",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(agent_id)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(internal("listing recent interactions"))?;
        tx.commit().await.map_err(internal("committing recent_interactions"))?;
        rows.iter().map(row_to_episodic).collect()
    }

    async fn search_interactions(
        &self,
        tenant_id: &str,
        user_id: &str,
        agent_id: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredRow<EpisodicMemory>>> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let rows = sqlx::query(
            "SELECT * FROM episodic_memory WHERE tenant_id = $1 AND user_id = $2 AND agent_id = $3
             AND embedding IS NOT NULL",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(agent_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(internal("searching interactions"))?;
        tx.commit().await.map_err(internal("committing search_interactions"))?;

        let mut hits: Vec<ScoredRow<EpisodicMemory>> = rows
            .iter()
            .map(row_to_episodic)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .map(|row| {
                let score = row.embedding.as_ref().map(|e| cosine_similarity(e, query_embedding)).unwrap_or(-1.0);
                (row, score)
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
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let id = Uuid::new_v4();
        let vector = embedding.clone().map(Vector::from);
        sqlx::query(
            "INSERT INTO procedural_memory (id, tenant_id, user_id, agent_id, trigger_condition, embedding, procedure_type, content)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(user_id)
        .bind(agent_id)
        .bind(&trigger_condition)
        .bind(&vector)
        .bind(procedure_type_str(procedure_type))
        .bind(&content)
        .execute(&mut *tx)
        .await
        .map_err(internal("inserting procedural row"))?;
        tx.commit().await.map_err(internal("committing save_skill"))?;
        Ok(ProceduralMemory {
            id,
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
            trigger_condition,
            embedding,
            procedure_type,
            content,
        })
    }

    async fn get_relevant_skills(
        &self,
        tenant_id: &str,
        user_id: &str,
        agent_id: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredRow<ProceduralMemory>>> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let rows = sqlx::query(
            "SELECT * FROM procedural_memory WHERE tenant_id = $1 AND user_id = $2 AND agent_id = $3
             AND embedding IS NOT NULL",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(agent_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(internal("listing procedural memory"))?;
        tx.commit().await.map_err(internal("committing get_relevant_skills"))?;

        let mut hits: Vec<ScoredRow<ProceduralMemory>> = Vec::new();
        for row in rows {
            let embedding: Option<Vector> = row.try_get("embedding").map_err(internal("reading embedding"))?;
            let procedure_type_raw: String = row.try_get("procedure_type").map_err(internal("reading procedure_type"))?;
            let embedding_vec = embedding.map(|v| v.to_vec());
            let score = embedding_vec.as_ref().map(|e| cosine_similarity(e, query_embedding)).unwrap_or(-1.0);
            hits.push((
                ProceduralMemory {
                    id: row.try_get("id").map_err(internal("reading id"))?,
                    tenant_id: row.try_get("tenant_id").map_err(internal("reading tenant_id"))?,
                    user_id: row.try_get("user_id").map_err(internal("reading user_id"))?,
                    agent_id: row.try_get("agent_id").map_err(internal("reading agent_id"))?,
                    trigger_condition: row.try_get("trigger_condition").map_err(internal("reading trigger_condition"))?,
                    embedding: embedding_vec,
                    procedure_type: parse_procedure_type(&procedure_type_raw)?,
                    content: row.try_get("content").map_err(internal("reading content"))?,
                },
                score,
            ));
        }
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn set_working(&self, tenant_id: &str, user_id: &str, plan_id: Uuid, key: String, value: Value) -> Result<()> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        sqlx::query(
            "INSERT INTO working_memory (tenant_id, user_id, plan_id, key, value, updated_at)
             VALUES ($1, $2, $3, $4, $5, now())
             ON CONFLICT (plan_id, key) DO UPDATE SET value = excluded.value, updated_at = now()",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(plan_id)
        .bind(&key)
        .bind(&value)
        .execute(&mut *tx)
        .await
        .map_err(internal("setting working memory"))?;
        tx.commit().await.map_err(internal("committing set_working"))?;
        Ok(())
    }

    async fn get_working(&self, tenant_id: &str, user_id: &str, plan_id: Uuid, key: &str) -> Result<Value> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let row: Option<(Value,)> = sqlx::query_as(
            "SELECT value FROM working_memory WHERE tenant_id = $1 AND user_id = $2 AND plan_id = $3 AND key = $4",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(plan_id)
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(internal("fetching working memory"))?;
        tx.commit().await.map_err(internal("committing get_working"))?;
        row.map(|(v,)| v).ok_or_else(|| SoormaError::NotFound(format!("working key {key} not found for plan {plan_id}")))
    }

    async fn delete_working(&self, tenant_id: &str, user_id: &str, plan_id: Uuid, key: &str) -> Result<()> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        sqlx::query("DELETE FROM working_memory WHERE tenant_id = $1 AND user_id = $2 AND plan_id = $3 AND key = $4")
            .bind(tenant_id)
            .bind(user_id)
            .bind(plan_id)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(internal("deleting working memory key"))?;
        tx.commit().await.map_err(internal("committing delete_working"))?;
        Ok(())
    }

    async fn delete_plan_working(&self, tenant_id: &str, user_id: &str, plan_id: Uuid) -> Result<u64> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let result = sqlx::query("DELETE FROM working_memory WHERE tenant_id = $1 AND user_id = $2 AND plan_id = $3")
            .bind(tenant_id)
            .bind(user_id)
            .bind(plan_id)
            .execute(&mut *tx)
            .await
            .map_err(internal("deleting plan working memory"))?;
        tx.commit().await.map_err(internal("committing delete_plan_working"))?;
        Ok(result.rows_affected())
    }

    async fn save_task_context(&self, ctx: TaskContext) -> Result<TaskContext> {
        let mut tx = self.begin_scoped(&ctx.tenant_id, &ctx.user_id).await?;
        sqlx::query(
            "INSERT INTO task_contexts (tenant_id, user_id, agent_id, task_id, plan_id, event_type, data,
                                         response_event, response_topic, sub_tasks, state)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (tenant_id, user_id, task_id) DO UPDATE SET
                agent_id = excluded.agent_id, plan_id = excluded.plan_id, event_type = excluded.event_type,
                data = excluded.data, response_event = excluded.response_event, response_topic = excluded.response_topic,
                sub_tasks = excluded.sub_tasks, state = excluded.state",
        )
        .bind(&ctx.tenant_id)
        .bind(&ctx.user_id)
        .bind(&ctx.agent_id)
        .bind(&ctx.task_id)
        .bind(ctx.plan_id)
        .bind(&ctx.event_type)
        .bind(&ctx.data)
        .bind(&ctx.response_event)
        .bind(&ctx.response_topic)
        .bind(Value::Object(ctx.sub_tasks.clone()))
        .bind(Value::Object(ctx.state.clone()))
        .execute(&mut *tx)
        .await
        .map_err(internal("saving task context"))?;
        tx.commit().await.map_err(internal("committing save_task_context"))?;
        Ok(ctx)
    }

    async fn get_task_context(&self, tenant_id: &str, user_id: &str, task_id: &str) -> Result<TaskContext> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let row = sqlx::query("SELECT * FROM task_contexts WHERE tenant_id = $1 AND user_id = $2 AND task_id = $3")
            .bind(tenant_id)
            .bind(user_id)
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal("fetching task context"))?
            .ok_or_else(|| SoormaError::NotFound(format!("task context {task_id} not found")))?;
        tx.commit().await.map_err(internal("committing get_task_context"))?;
        row_to_task_context(&row)
    }

    async fn update_task_context(
        &self,
        tenant_id: &str,
        user_id: &str,
        task_id: &str,
        patch: Map<String, Value>,
    ) -> Result<TaskContext> {
        let mut ctx = self.get_task_context(tenant_id, user_id, task_id).await?;
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
        self.save_task_context(ctx).await
    }

    async fn delete_task_context(&self, tenant_id: &str, user_id: &str, task_id: &str) -> Result<()> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        sqlx::query("DELETE FROM task_contexts WHERE tenant_id = $1 AND user_id = $2 AND task_id = $3")
            .bind(tenant_id)
            .bind(user_id)
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(internal("deleting task context"))?;
        tx.commit().await.map_err(internal("committing delete_task_context"))?;
        Ok(())
    }

    async fn get_task_by_subtask(&self, tenant_id: &str, user_id: &str, sub_task_id: &str) -> Result<TaskContext> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let row = sqlx::query(
            "SELECT * FROM task_contexts WHERE tenant_id = $1 AND user_id = $2 AND sub_tasks ? $3",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(sub_task_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(internal("searching sub-tasks"))?
        .ok_or_else(|| SoormaError::NotFound(format!("no task context references sub-task {sub_task_id}")))?;
        tx.commit().await.map_err(internal("committing get_task_by_subtask"))?;
        row_to_task_context(&row)
    }

    async fn save_plan_context(&self, ctx: PlanContext) -> Result<PlanContext> {
        let mut tx = self.begin_scoped(&ctx.tenant_id, &ctx.user_id).await?;
        sqlx::query(
            "INSERT INTO plan_contexts (tenant_id, user_id, plan_id, goal_event, goal_data, state_machine,
                                         current_state, results, status, correlation_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (tenant_id, user_id, plan_id) DO UPDATE SET
                goal_event = excluded.goal_event, goal_data = excluded.goal_data, state_machine = excluded.state_machine,
                current_state = excluded.current_state, results = excluded.results, status = excluded.status,
                correlation_id = excluded.correlation_id",
        )
        .bind(&ctx.tenant_id)
        .bind(&ctx.user_id)
        .bind(ctx.plan_id)
        .bind(&ctx.goal_event)
        .bind(&ctx.goal_data)
        .bind(&ctx.state_machine)
        .bind(&ctx.current_state)
        .bind(&ctx.results)
        .bind(status_str(ctx.status))
        .bind(&ctx.correlation_id)
        .execute(&mut *tx)
        .await
        .map_err(internal("saving plan context"))?;
        tx.commit().await.map_err(internal("committing save_plan_context"))?;
        Ok(ctx)
    }

    async fn get_plan_context(&self, tenant_id: &str, user_id: &str, plan_id: Uuid) -> Result<PlanContext> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let row = sqlx::query("SELECT * FROM plan_contexts WHERE tenant_id = $1 AND user_id = $2 AND plan_id = $3")
            .bind(tenant_id)
            .bind(user_id)
            .bind(plan_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal("fetching plan context"))?
            .ok_or_else(|| SoormaError::NotFound(format!("plan context {plan_id} not found")))?;
        tx.commit().await.map_err(internal("committing get_plan_context"))?;
        row_to_plan_context(&row)
    }

    async fn update_plan_context(
        &self,
        tenant_id: &str,
        user_id: &str,
        plan_id: Uuid,
        patch: Map<String, Value>,
    ) -> Result<PlanContext> {
        let mut ctx = self.get_plan_context(tenant_id, user_id, plan_id).await?;
        for (key, value) in patch {
            match key.as_str() {
                "current_state" => {
                    if let Some(s) = value.as_str() {
                        ctx.current_state = s.to_string();
                    }
                }
                "status" => {
                    if let Some(s) = value.as_str() {
                        ctx.status = parse_status(s)?;
                    }
                }
                "results" => {
                    if let (Value::Object(existing), Value::Object(incoming)) = (&mut ctx.results, value.clone()) {
                        existing.extend(incoming);
                    } else {
                        ctx.results = value;
                    }
                }
                "correlation_id" => {
                    if let Some(s) = value.as_str() {
                        ctx.correlation_id = s.to_string();
                    }
                }
                _ => {}
            }
        }
        self.save_plan_context(ctx).await
    }

    async fn delete_plan_context(&self, tenant_id: &str, user_id: &str, plan_id: Uuid) -> Result<()> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        sqlx::query("DELETE FROM plan_contexts WHERE tenant_id = $1 AND user_id = $2 AND plan_id = $3")
            .bind(tenant_id)
            .bind(user_id)
            .bind(plan_id)
            .execute(&mut *tx)
            .await
            .map_err(internal("deleting plan context"))?;
        tx.commit().await.map_err(internal("committing delete_plan_context"))?;
        Ok(())
    }

    async fn get_plan_context_by_correlation(
        &self,
        tenant_id: &str,
        user_id: &str,
        correlation_id: &str,
    ) -> Result<PlanContext> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let row = sqlx::query(
            "SELECT * FROM plan_contexts WHERE tenant_id = $1 AND user_id = $2 AND correlation_id = $3",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(correlation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(internal("fetching plan context by correlation"))?
        .ok_or_else(|| SoormaError::NotFound(format!("no plan context with correlation {correlation_id}")))?;
        tx.commit().await.map_err(internal("committing get_plan_context_by_correlation"))?;
        row_to_plan_context(&row)
    }

    async fn create_plan(&self, plan: Plan) -> Result<Plan> {
        let mut tx = self.begin_scoped(&plan.tenant_id, &plan.user_id).await?;
        sqlx::query(
            "INSERT INTO plans (plan_id, tenant_id, user_id, session_id, goal, status, started_at, ended_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(plan.plan_id)
        .bind(&plan.tenant_id)
        .bind(&plan.user_id)
        .bind(plan.session_id)
        .bind(&plan.goal)
        .bind(status_str(plan.status))
        .bind(plan.started_at)
        .bind(plan.ended_at)
        .execute(&mut *tx)
        .await
        .map_err(internal("creating plan"))?;
        tx.commit().await.map_err(internal("committing create_plan"))?;
        Ok(plan)
    }

    async fn get_plan(&self, tenant_id: &str, user_id: &str, plan_id: Uuid) -> Result<Plan> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let row = sqlx::query("SELECT * FROM plans WHERE tenant_id = $1 AND user_id = $2 AND plan_id = $3")
            .bind(tenant_id)
            .bind(user_id)
            .bind(plan_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal("fetching plan"))?
            .ok_or_else(|| SoormaError::NotFound(format!("plan {plan_id} not found")))?;
        tx.commit().await.map_err(internal("committing get_plan"))?;
        row_to_plan(&row)
    }

    async fn update_plan_status(&self, tenant_id: &str, user_id: &str, plan_id: Uuid, status: PlanStatus) -> Result<Plan> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let ended_at = matches!(status, PlanStatus::Completed | PlanStatus::Failed).then(Utc::now);
        let row = sqlx::query(
            "UPDATE plans SET status = $1, ended_at = COALESCE($2, ended_at)
             WHERE tenant_id = $3 AND user_id = $4 AND plan_id = $5 RETURNING *",
        )
        .bind(status_str(status))
        .bind(ended_at)
        .bind(tenant_id)
        .bind(user_id)
        .bind(plan_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(internal("updating plan status"))?
        .ok_or_else(|| SoormaError::NotFound(format!("plan {plan_id} not found")))?;
        tx.commit().await.map_err(internal("committing update_plan_status"))?;
        row_to_plan(&row)
    }

    async fn list_plans(
        &self,
        tenant_id: &str,
        user_id: &str,
        session_id: Option<Uuid>,
        status: Option<PlanStatus>,
    ) -> Result<Vec<Plan>> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let rows = sqlx::query(
            "SELECT * FROM plans WHERE tenant_id = $1 AND user_id = $2
             AND ($3::uuid IS NULL OR session_id = $3) AND ($4::text IS NULL OR status = $4)",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(session_id)
        .bind(status.map(status_str))
        .fetch_all(&mut *tx)
        .await
        .map_err(internal("listing plans"))?;
        tx.commit().await.map_err(internal("committing list_plans"))?;
        rows.iter().map(row_to_plan).collect()
    }

    async fn create_session(&self, session: Session) -> Result<Session> {
        let mut tx = self.begin_scoped(&session.tenant_id, &session.user_id).await?;
        sqlx::query(
            "INSERT INTO sessions (session_id, tenant_id, user_id, title, session_metadata) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(session.session_id)
        .bind(&session.tenant_id)
        .bind(&session.user_id)
        .bind(&session.title)
        .bind(&session.session_metadata)
        .execute(&mut *tx)
        .await
        .map_err(internal("creating session"))?;
        tx.commit().await.map_err(internal("committing create_session"))?;
        Ok(session)
    }

    async fn get_session(&self, tenant_id: &str, user_id: &str, session_id: Uuid) -> Result<Session> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let row = sqlx::query("SELECT * FROM sessions WHERE tenant_id = $1 AND user_id = $2 AND session_id = $3")
            .bind(tenant_id)
            .bind(user_id)
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal("fetching session"))?
            .ok_or_else(|| SoormaError::NotFound(format!("session {session_id} not found")))?;
        tx.commit().await.map_err(internal("committing get_session"))?;
        row_to_session(&row)
    }

    async fn list_sessions(&self, tenant_id: &str, user_id: &str) -> Result<Vec<Session>> {
        let mut tx = self.begin_scoped(tenant_id, user_id).await?;
        let rows = sqlx::query("SELECT * FROM sessions WHERE tenant_id = $1 AND user_id = $2")
            .bind(tenant_id)
            .bind(user_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(internal("listing sessions"))?;
        tx.commit().await.map_err(internal("committing list_sessions"))?;
        rows.iter().map(row_to_session).collect()
    }
}

fn row_to_task_context(row: &sqlx::postgres::PgRow) -> Result<TaskContext> {
    let sub_tasks: Value = row.try_get("sub_tasks").map_err(internal("reading sub_tasks"))?;
    let state: Value = row.try_get("state").map_err(internal("reading state"))?;
    Ok(TaskContext {
        tenant_id: row.try_get("tenant_id").map_err(internal("reading tenant_id"))?,
        user_id: row.try_get("user_id").map_err(internal("reading user_id"))?,
        agent_id: row.try_get("agent_id").map_err(internal("reading agent_id"))?,
        task_id: row.try_get("task_id").map_err(internal("reading task_id"))?,
        plan_id: row.try_get("plan_id").map_err(internal("reading plan_id"))?,
        event_type: row.try_get("event_type").map_err(internal("reading event_type"))?,
        data: row.try_get("data").map_err(internal("reading data"))?,
        response_event: row.try_get("response_event").map_err(internal("reading response_event"))?,
        response_topic: row.try_get("response_topic").map_err(internal("reading response_topic"))?,
        sub_tasks: match sub_tasks {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        state: match state {
            Value::Object(map) => map,
            _ => Map::new(),
        },
    })
}

fn row_to_plan_context(row: &sqlx::postgres::PgRow) -> Result<PlanContext> {
    let status_raw: String = row.try_get("status").map_err(internal("reading status"))?;
    Ok(PlanContext {
        tenant_id: row.try_get("tenant_id").map_err(internal("reading tenant_id"))?,
        user_id: row.try_get("user_id").map_err(internal("reading user_id"))?,
        plan_id: row.try_get("plan_id").map_err(internal("reading plan_id"))?,
        goal_event: row.try_get("goal_event").map_err(internal("reading goal_event"))?,
        goal_data: row.try_get("goal_data").map_err(internal("reading goal_data"))?,
        state_machine: row.try_get("state_machine").map_err(internal("reading state_machine"))?,
        current_state: row.try_get("current_state").map_err(internal("reading current_state"))?,
        results: row.try_get("results").map_err(internal("reading results"))?,
        status: parse_status(&status_raw)?,
        correlation_id: row.try_get("correlation_id").map_err(internal("reading correlation_id"))?,
    })
}

fn row_to_plan(row: &sqlx::postgres::PgRow) -> Result<Plan> {
    let status_raw: String = row.try_get("status").map_err(internal("reading status"))?;
    Ok(Plan {
        plan_id: row.try_get("plan_id").map_err(internal("reading plan_id"))?,
        tenant_id: row.try_get("tenant_id").map_err(internal("reading tenant_id"))?,
        user_id: row.try_get("user_id").map_err(internal("reading user_id"))?,
        session_id: row.try_get("session_id").map_err(internal("reading session_id"))?,
        goal: row.try_get("goal").map_err(internal("reading goal"))?,
        status: parse_status(&status_raw)?,
        started_at: row.try_get("started_at").map_err(internal("reading started_at"))?,
        ended_at: row.try_get("ended_at").map_err(internal("reading ended_at"))?,
    })
}

fn row_to_session(row: &sqlx::postgres::PgRow) -> Result<Session> {
    Ok(Session {
        session_id: row.try_get("session_id").map_err(internal("reading session_id"))?,
        tenant_id: row.try_get("tenant_id").map_err(internal("reading tenant_id"))?,
        user_id: row.try_get("user_id").map_err(internal("reading user_id"))?,
        title: row.try_get("title").map_err(internal("reading title"))?,
        session_metadata: row.try_get("session_metadata").map_err(internal("reading session_metadata"))?,
    })
}
