//! In-process fake clients (feature `testing`): wrap the other services'
//! storage traits directly, skipping HTTP and SSE entirely, so handler
//! logic can be exercised in a single-process test without standing up
//! the Event Bus, Registry, and Memory services.
//!
//! [`FakeBusClient`] deliberately does not replicate `soorma-bus`'s
//! queue-group round-robin/`assigned_to` dispatch — it filters on
//! `event_type` only. That's enough to drive one agent's handlers against
//! a fake bus; testing cross-agent queue-group contention needs the real
//! services.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use soorma_backbone::Backbone;
use soorma_envelope::Envelope;
use soorma_memory::embedding::EmbeddingProvider;
use soorma_memory::store::MemoryStore;
use soorma_registry::store::Store as RegistryStore;
use soorma_types::{SoormaError, Topic};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::bus::{BusClient, EnvelopeStream, SubscribeFilter};
use crate::entities as wire;
use crate::error::RuntimeError;
use crate::identity::Identity;
use crate::memory::{MemoryClient, ScoredRow};
use crate::registry::RegistryClient;

// ---- bus ----

/// In-process [`BusClient`] backed directly by a [`Backbone`].
pub struct FakeBusClient {
    backbone: Arc<dyn Backbone>,
}

impl FakeBusClient {
    pub fn new(backbone: Arc<dyn Backbone>) -> Self {
        Self { backbone }
    }
}

#[async_trait]
impl BusClient for FakeBusClient {
    async fn publish(&self, envelope: Envelope) -> Result<Envelope, RuntimeError> {
        self.backbone.commit(&envelope).await.map_err(RuntimeError::from)?;
        Ok(envelope)
    }

    async fn ack(&self, _event_id: Uuid) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn subscribe(&self, topic: Topic, filter: SubscribeFilter) -> Result<EnvelopeStream, RuntimeError> {
        let receiver = self.backbone.tail(topic);
        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            let filter = filter.clone();
            async move {
                let envelope = item.ok()?;
                if let Some(event_type) = &filter.event_type {
                    if &envelope.event_type != event_type {
                        return None;
                    }
                }
                if let Some(assigned_to) = &filter.assigned_to {
                    if envelope.assigned_to.as_deref() != Some(assigned_to.as_str()) {
                        return None;
                    }
                }
                Some(envelope)
            }
        });
        Ok(Box::pin(stream))
    }
}

// ---- registry ----

/// In-process [`RegistryClient`] backed directly by a [`RegistryStore`].
pub struct FakeRegistryClient {
    store: Arc<dyn RegistryStore>,
}

impl FakeRegistryClient {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self { store }
    }
}

fn to_wire_status(status: soorma_registry::entities::AgentStatus) -> wire::AgentStatus {
    match status {
        soorma_registry::entities::AgentStatus::Active => wire::AgentStatus::Active,
        soorma_registry::entities::AgentStatus::Expired => wire::AgentStatus::Expired,
        soorma_registry::entities::AgentStatus::Deregistered => wire::AgentStatus::Deregistered,
    }
}

fn to_wire_agent(record: soorma_registry::entities::AgentRecord) -> wire::AgentRecord {
    wire::AgentRecord {
        agent_id: record.agent_id,
        name: record.name,
        version: record.version,
        capabilities: record.capabilities,
        events_consumed: record.events_consumed,
        events_produced: record.events_produced,
        endpoint_hint: record.endpoint_hint,
        tenant_scope: record.tenant_scope,
        last_heartbeat_at: record.last_heartbeat_at,
        ttl_seconds: record.ttl_seconds,
        status: to_wire_status(record.status),
    }
}

fn from_wire_definition(def: wire::AgentDefinition) -> soorma_registry::entities::AgentDefinition {
    soorma_registry::entities::AgentDefinition {
        name: def.name,
        version: def.version,
        capabilities: def.capabilities,
        events_consumed: def.events_consumed,
        events_produced: def.events_produced,
        endpoint_hint: def.endpoint_hint,
        tenant_scope: def.tenant_scope,
        ttl_seconds: def.ttl_seconds,
    }
}

fn to_wire_event(def: soorma_registry::entities::EventDefinition) -> wire::EventDefinition {
    wire::EventDefinition {
        event_name: def.event_name,
        topic: def.topic,
        description: def.description,
        payload_schema_name: def.payload_schema_name,
        produced_by_agents: def.produced_by_agents,
        consumed_by_agents: def.consumed_by_agents,
        tenant_scope: def.tenant_scope,
    }
}

fn from_wire_event(def: wire::EventDefinition) -> soorma_registry::entities::EventDefinition {
    soorma_registry::entities::EventDefinition {
        event_name: def.event_name,
        topic: def.topic,
        description: def.description,
        payload_schema_name: def.payload_schema_name,
        produced_by_agents: def.produced_by_agents,
        consumed_by_agents: def.consumed_by_agents,
        tenant_scope: def.tenant_scope,
    }
}

fn to_wire_schema(schema: soorma_registry::entities::PayloadSchema) -> wire::PayloadSchema {
    wire::PayloadSchema {
        schema_name: schema.schema_name,
        version: schema.version,
        json_schema: schema.json_schema,
        owner_agent_id: schema.owner_agent_id,
    }
}

fn from_wire_schema(schema: wire::PayloadSchema) -> soorma_registry::entities::PayloadSchema {
    soorma_registry::entities::PayloadSchema {
        schema_name: schema.schema_name,
        version: schema.version,
        json_schema: schema.json_schema,
        owner_agent_id: schema.owner_agent_id,
    }
}

fn from_wire_filter(filter: wire::DiscoverFilter) -> soorma_registry::entities::DiscoverFilter {
    soorma_registry::entities::DiscoverFilter {
        capability: filter.capability,
        consumes_event: filter.consumes_event,
        produces_event: filter.produces_event,
        tenant_scope: filter.tenant_scope,
    }
}

#[async_trait]
impl RegistryClient for FakeRegistryClient {
    async fn register_agent(&self, definition: wire::AgentDefinition) -> Result<wire::AgentRecord, RuntimeError> {
        let record = self.store.register_agent(from_wire_definition(definition)).await?;
        Ok(to_wire_agent(record))
    }

    async fn heartbeat(&self, agent_id: &str) -> Result<wire::AgentRecord, RuntimeError> {
        let record = self.store.heartbeat(agent_id).await?;
        Ok(to_wire_agent(record))
    }

    async fn deregister(&self, agent_id: &str) -> Result<(), RuntimeError> {
        self.store.deregister(agent_id).await?;
        Ok(())
    }

    async fn discover(&self, filter: wire::DiscoverFilter) -> Result<Vec<wire::AgentRecord>, RuntimeError> {
        let records = self.store.discover(from_wire_filter(filter)).await?;
        Ok(records.into_iter().map(to_wire_agent).collect())
    }

    async fn register_event(&self, definition: wire::EventDefinition) -> Result<wire::EventDefinition, RuntimeError> {
        let definition = self.store.register_event(from_wire_event(definition)).await?;
        Ok(to_wire_event(definition))
    }

    async fn list_events(&self, tenant_scope: Option<&str>) -> Result<Vec<wire::EventDefinition>, RuntimeError> {
        let scope = tenant_scope.unwrap_or("*");
        let events = self.store.list_events(scope, None).await?;
        Ok(events.into_iter().map(to_wire_event).collect())
    }

    async fn register_schema(&self, schema: wire::PayloadSchema) -> Result<wire::PayloadSchema, RuntimeError> {
        let schema = self.store.register_schema(from_wire_schema(schema)).await?;
        Ok(to_wire_schema(schema))
    }

    async fn get_schema(&self, schema_name: &str) -> Result<wire::PayloadSchema, RuntimeError> {
        let schema = self.store.get_schema(schema_name).await?;
        Ok(to_wire_schema(schema))
    }
}

// ---- memory ----

/// In-process [`MemoryClient`] backed directly by a [`MemoryStore`],
/// embedding queries/content itself the way the Memory service's HTTP
/// handlers do.
pub struct FakeMemoryClient {
    store: Arc<dyn MemoryStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    identity: Identity,
}

impl FakeMemoryClient {
    pub fn new(store: Arc<dyn MemoryStore>, embeddings: Arc<dyn EmbeddingProvider>, identity: Identity) -> Self {
        Self { store, embeddings, identity }
    }

    fn user_id(&self) -> String {
        self.identity.user_id.clone().unwrap_or_default()
    }
}

fn to_wire_semantic(row: soorma_memory::entities::SemanticMemory) -> wire::SemanticMemory {
    wire::SemanticMemory {
        id: row.id,
        tenant_id: row.tenant_id,
        user_id: row.user_id,
        is_public: row.is_public,
        content: row.content,
        content_hash: row.content_hash,
        external_id: row.external_id,
        embedding: row.embedding,
        metadata: row.metadata,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn to_wire_upsert_action(action: soorma_memory::entities::UpsertAction) -> wire::UpsertAction {
    match action {
        soorma_memory::entities::UpsertAction::Created => wire::UpsertAction::Created,
        soorma_memory::entities::UpsertAction::Updated => wire::UpsertAction::Updated,
        soorma_memory::entities::UpsertAction::DuplicateSkipped => wire::UpsertAction::DuplicateSkipped,
    }
}

fn from_wire_role(role: wire::InteractionRole) -> soorma_memory::entities::InteractionRole {
    match role {
        wire::InteractionRole::User => soorma_memory::entities::InteractionRole::User,
        wire::InteractionRole::Assistant => soorma_memory::entities::InteractionRole::Assistant,
        wire::InteractionRole::System => soorma_memory::entities::InteractionRole::System,
        wire::InteractionRole::Tool => soorma_memory::entities::InteractionRole::Tool,
    }
}

fn to_wire_episodic(row: soorma_memory::entities::EpisodicMemory) -> wire::EpisodicMemory {
    wire::EpisodicMemory {
        id: row.id,
        tenant_id: row.tenant_id,
        user_id: row.user_id,
        agent_id: row.agent_id,
        role: match row.role {
            soorma_memory::entities::InteractionRole::User => wire::InteractionRole::User,
            soorma_memory::entities::InteractionRole::Assistant => wire::InteractionRole::Assistant,
            soorma_memory::entities::InteractionRole::System => wire::InteractionRole::System,
            soorma_memory::entities::InteractionRole::Tool => wire::InteractionRole::Tool,
        },
        content: row.content,
        embedding: row.embedding,
        occurred_at: row.occurred_at,
    }
}

fn to_wire_procedural(row: soorma_memory::entities::ProceduralMemory) -> wire::ProceduralMemory {
    wire::ProceduralMemory {
        id: row.id,
        tenant_id: row.tenant_id,
        user_id: row.user_id,
        agent_id: row.agent_id,
        trigger_condition: row.trigger_condition,
        embedding: row.embedding,
        procedure_type: match row.procedure_type {
            soorma_memory::entities::ProcedureType::SystemPrompt => wire::ProcedureType::SystemPrompt,
            soorma_memory::entities::ProcedureType::FewShotExample => wire::ProcedureType::FewShotExample,
        },
        content: row.content,
    }
}

fn to_wire_task(ctx: soorma_memory::entities::TaskContext) -> wire::TaskContext {
    wire::TaskContext {
        tenant_id: ctx.tenant_id,
        user_id: ctx.user_id,
        agent_id: ctx.agent_id,
        task_id: ctx.task_id,
        plan_id: ctx.plan_id,
        event_type: ctx.event_type,
        data: ctx.data,
        response_event: ctx.response_event,
        response_topic: ctx.response_topic,
        sub_tasks: ctx.sub_tasks,
        state: ctx.state,
    }
}

fn from_wire_task(ctx: wire::TaskContext) -> soorma_memory::entities::TaskContext {
    soorma_memory::entities::TaskContext {
        tenant_id: ctx.tenant_id,
        user_id: ctx.user_id,
        agent_id: ctx.agent_id,
        task_id: ctx.task_id,
        plan_id: ctx.plan_id,
        event_type: ctx.event_type,
        data: ctx.data,
        response_event: ctx.response_event,
        response_topic: ctx.response_topic,
        sub_tasks: ctx.sub_tasks,
        state: ctx.state,
    }
}

fn to_wire_plan_status(status: soorma_memory::entities::PlanStatus) -> wire::PlanStatus {
    match status {
        soorma_memory::entities::PlanStatus::Running => wire::PlanStatus::Running,
        soorma_memory::entities::PlanStatus::Paused => wire::PlanStatus::Paused,
        soorma_memory::entities::PlanStatus::Completed => wire::PlanStatus::Completed,
        soorma_memory::entities::PlanStatus::Failed => wire::PlanStatus::Failed,
    }
}

fn from_wire_plan_status(status: wire::PlanStatus) -> soorma_memory::entities::PlanStatus {
    match status {
        wire::PlanStatus::Running => soorma_memory::entities::PlanStatus::Running,
        wire::PlanStatus::Paused => soorma_memory::entities::PlanStatus::Paused,
        wire::PlanStatus::Completed => soorma_memory::entities::PlanStatus::Completed,
        wire::PlanStatus::Failed => soorma_memory::entities::PlanStatus::Failed,
    }
}

fn to_wire_plan_context(ctx: soorma_memory::entities::PlanContext) -> wire::PlanContext {
    wire::PlanContext {
        tenant_id: ctx.tenant_id,
        user_id: ctx.user_id,
        plan_id: ctx.plan_id,
        goal_event: ctx.goal_event,
        goal_data: ctx.goal_data,
        state_machine: ctx.state_machine,
        current_state: ctx.current_state,
        results: ctx.results,
        status: to_wire_plan_status(ctx.status),
        correlation_id: ctx.correlation_id,
    }
}

fn from_wire_plan_context(ctx: wire::PlanContext) -> soorma_memory::entities::PlanContext {
    soorma_memory::entities::PlanContext {
        tenant_id: ctx.tenant_id,
        user_id: ctx.user_id,
        plan_id: ctx.plan_id,
        goal_event: ctx.goal_event,
        goal_data: ctx.goal_data,
        state_machine: ctx.state_machine,
        current_state: ctx.current_state,
        results: ctx.results,
        status: from_wire_plan_status(ctx.status),
        correlation_id: ctx.correlation_id,
    }
}

fn to_wire_plan(plan: soorma_memory::entities::Plan) -> wire::Plan {
    wire::Plan {
        plan_id: plan.plan_id,
        tenant_id: plan.tenant_id,
        user_id: plan.user_id,
        session_id: plan.session_id,
        goal: plan.goal,
        status: to_wire_plan_status(plan.status),
        started_at: plan.started_at,
        ended_at: plan.ended_at,
    }
}

fn from_wire_plan(plan: wire::Plan) -> soorma_memory::entities::Plan {
    soorma_memory::entities::Plan {
        plan_id: plan.plan_id,
        tenant_id: plan.tenant_id,
        user_id: plan.user_id,
        session_id: plan.session_id,
        goal: plan.goal,
        status: from_wire_plan_status(plan.status),
        started_at: plan.started_at,
        ended_at: plan.ended_at,
    }
}

fn to_wire_session(session: soorma_memory::entities::Session) -> wire::Session {
    wire::Session {
        session_id: session.session_id,
        tenant_id: session.tenant_id,
        user_id: session.user_id,
        title: session.title,
        session_metadata: session.session_metadata,
    }
}

fn from_wire_session(session: wire::Session) -> soorma_memory::entities::Session {
    soorma_memory::entities::Session {
        session_id: session.session_id,
        tenant_id: session.tenant_id,
        user_id: session.user_id,
        title: session.title,
        session_metadata: session.session_metadata,
    }
}

/// Flatten a `Result<T, SoormaError>` patch-apply into a JSON patch
/// object's worth of `serde_json::Map`, the shape [`MemoryStore::update_task_context`]
/// and [`MemoryStore::update_plan_context`] expect.
fn value_to_patch_map(patch: Value) -> Map<String, Value> {
    match patch {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

#[async_trait]
impl MemoryClient for FakeMemoryClient {
    async fn upsert_knowledge(&self, request: wire::UpsertKnowledgeRequest) -> Result<wire::UpsertKnowledgeResponse, RuntimeError> {
        let embedding = self.embeddings.embed(&request.content).await?;
        let request = soorma_memory::entities::UpsertKnowledgeRequest {
            content: request.content,
            metadata: request.metadata,
            external_id: request.external_id,
            is_public: request.is_public,
        };
        let response = self.store.upsert_knowledge(&self.identity.tenant_id, &self.user_id(), request, Some(embedding)).await?;
        Ok(wire::UpsertKnowledgeResponse { id: response.id, action: to_wire_upsert_action(response.action) })
    }

    async fn search_semantic(&self, query: &str, limit: usize, include_public: bool) -> Result<Vec<ScoredRow<wire::SemanticMemory>>, RuntimeError> {
        let embedding = self.embeddings.embed(query).await?;
        let rows = self
            .store
            .search_knowledge(&self.identity.tenant_id, &self.user_id(), &embedding, limit, include_public)
            .await?;
        Ok(rows.into_iter().map(|(row, score)| (to_wire_semantic(row), score)).collect())
    }

    async fn delete_semantic(&self, id: Uuid) -> Result<(), RuntimeError> {
        self.store.delete_knowledge(&self.identity.tenant_id, &self.user_id(), id).await?;
        Ok(())
    }

    async fn log_interaction(&self, request: wire::LogInteractionRequest) -> Result<wire::EpisodicMemory, RuntimeError> {
        let embedding = self.embeddings.embed(&request.content).await?;
        let request = soorma_memory::entities::LogInteractionRequest {
            agent_id: request.agent_id,
            role: from_wire_role(request.role),
            content: request.content,
            metadata: request.metadata,
        };
        let row = self.store.log_interaction(&self.identity.tenant_id, &self.user_id(), request, Some(embedding)).await?;
        Ok(to_wire_episodic(row))
    }

    async fn recent_episodes(&self, limit: usize) -> Result<Vec<wire::EpisodicMemory>, RuntimeError> {
        let user_id = self.user_id();
        let rows = self.store.recent_interactions(&self.identity.tenant_id, &user_id, "", limit).await?;
        Ok(rows.into_iter().map(to_wire_episodic).collect())
    }

    async fn search_episodic(&self, query: &str, limit: usize) -> Result<Vec<ScoredRow<wire::EpisodicMemory>>, RuntimeError> {
        let embedding = self.embeddings.embed(query).await?;
        let user_id = self.user_id();
        let rows = self
            .store
            .search_interactions(&self.identity.tenant_id, &user_id, "", &embedding, limit)
            .await?;
        Ok(rows.into_iter().map(|(row, score)| (to_wire_episodic(row), score)).collect())
    }

    async fn relevant_skills(&self, trigger: &str, limit: usize) -> Result<Vec<ScoredRow<wire::ProceduralMemory>>, RuntimeError> {
        let embedding = self.embeddings.embed(trigger).await?;
        let user_id = self.user_id();
        let rows = self
            .store
            .get_relevant_skills(&self.identity.tenant_id, &user_id, "", &embedding, limit)
            .await?;
        Ok(rows.into_iter().map(|(row, score)| (to_wire_procedural(row), score)).collect())
    }

    async fn set_working(&self, plan_id: Uuid, key: &str, value: Value) -> Result<(), RuntimeError> {
        self.store
            .set_working(&self.identity.tenant_id, &self.user_id(), plan_id, key.to_string(), value)
            .await?;
        Ok(())
    }

    async fn get_working(&self, plan_id: Uuid, key: &str) -> Result<Option<Value>, RuntimeError> {
        match self.store.get_working(&self.identity.tenant_id, &self.user_id(), plan_id, key).await {
            Ok(value) => Ok(Some(value)),
            Err(SoormaError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_working_key(&self, plan_id: Uuid, key: &str) -> Result<(), RuntimeError> {
        self.store.delete_working(&self.identity.tenant_id, &self.user_id(), plan_id, key).await?;
        Ok(())
    }

    async fn clear_working(&self, plan_id: Uuid) -> Result<(), RuntimeError> {
        self.store.delete_plan_working(&self.identity.tenant_id, &self.user_id(), plan_id).await?;
        Ok(())
    }

    async fn save_task_context(&self, context: wire::TaskContext) -> Result<(), RuntimeError> {
        self.store.save_task_context(from_wire_task(context)).await?;
        Ok(())
    }

    async fn get_task_context(&self, task_id: &str) -> Result<Option<wire::TaskContext>, RuntimeError> {
        match self.store.get_task_context(&self.identity.tenant_id, &self.user_id(), task_id).await {
            Ok(ctx) => Ok(Some(to_wire_task(ctx))),
            Err(SoormaError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn update_task_context(&self, task_id: &str, patch: Value) -> Result<wire::TaskContext, RuntimeError> {
        let ctx = self
            .store
            .update_task_context(&self.identity.tenant_id, &self.user_id(), task_id, value_to_patch_map(patch))
            .await?;
        Ok(to_wire_task(ctx))
    }

    async fn delete_task_context(&self, task_id: &str) -> Result<(), RuntimeError> {
        self.store.delete_task_context(&self.identity.tenant_id, &self.user_id(), task_id).await?;
        Ok(())
    }

    async fn get_task_context_by_sub_task(&self, sub_task_id: &str) -> Result<Option<wire::TaskContext>, RuntimeError> {
        match self.store.get_task_by_subtask(&self.identity.tenant_id, &self.user_id(), sub_task_id).await {
            Ok(ctx) => Ok(Some(to_wire_task(ctx))),
            Err(SoormaError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_plan_context(&self, context: wire::PlanContext) -> Result<(), RuntimeError> {
        self.store.save_plan_context(from_wire_plan_context(context)).await?;
        Ok(())
    }

    async fn get_plan_context(&self, plan_id: Uuid) -> Result<Option<wire::PlanContext>, RuntimeError> {
        match self.store.get_plan_context(&self.identity.tenant_id, &self.user_id(), plan_id).await {
            Ok(ctx) => Ok(Some(to_wire_plan_context(ctx))),
            Err(SoormaError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn update_plan_context(&self, plan_id: Uuid, patch: Value) -> Result<wire::PlanContext, RuntimeError> {
        let ctx = self
            .store
            .update_plan_context(&self.identity.tenant_id, &self.user_id(), plan_id, value_to_patch_map(patch))
            .await?;
        Ok(to_wire_plan_context(ctx))
    }

    async fn delete_plan_context(&self, plan_id: Uuid) -> Result<(), RuntimeError> {
        self.store.delete_plan_context(&self.identity.tenant_id, &self.user_id(), plan_id).await?;
        Ok(())
    }

    async fn get_plan_context_by_correlation(&self, correlation_id: &str) -> Result<Option<wire::PlanContext>, RuntimeError> {
        match self
            .store
            .get_plan_context_by_correlation(&self.identity.tenant_id, &self.user_id(), correlation_id)
            .await
        {
            Ok(ctx) => Ok(Some(to_wire_plan_context(ctx))),
            Err(SoormaError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn create_plan(&self, plan: wire::Plan) -> Result<wire::Plan, RuntimeError> {
        let plan = self.store.create_plan(from_wire_plan(plan)).await?;
        Ok(to_wire_plan(plan))
    }

    async fn list_plans(&self, session_id: Option<Uuid>) -> Result<Vec<wire::Plan>, RuntimeError> {
        let plans = self
            .store
            .list_plans(&self.identity.tenant_id, &self.user_id(), session_id, None)
            .await?;
        Ok(plans.into_iter().map(to_wire_plan).collect())
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<wire::Plan>, RuntimeError> {
        match self.store.get_plan(&self.identity.tenant_id, &self.user_id(), plan_id).await {
            Ok(plan) => Ok(Some(to_wire_plan(plan))),
            Err(SoormaError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set_plan_status(&self, plan_id: Uuid, status: wire::PlanStatus) -> Result<wire::Plan, RuntimeError> {
        let plan = self
            .store
            .update_plan_status(&self.identity.tenant_id, &self.user_id(), plan_id, from_wire_plan_status(status))
            .await?;
        Ok(to_wire_plan(plan))
    }

    async fn create_session(&self, session: wire::Session) -> Result<wire::Session, RuntimeError> {
        let session = self.store.create_session(from_wire_session(session)).await?;
        Ok(to_wire_session(session))
    }

    async fn list_sessions(&self) -> Result<Vec<wire::Session>, RuntimeError> {
        let sessions = self.store.list_sessions(&self.identity.tenant_id, &self.user_id()).await?;
        Ok(sessions.into_iter().map(to_wire_session).collect())
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<wire::Session>, RuntimeError> {
        match self.store.get_session(&self.identity.tenant_id, &self.user_id(), session_id).await {
            Ok(session) => Ok(Some(to_wire_session(session))),
            Err(SoormaError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
