//! Wire-level entity shapes used by the Registry and Memory clients (spec
//! §3.2, §3.3). Deliberately its own definitions rather than a dependency
//! on `soorma-registry`/`soorma-memory`'s entity types — an agent binary
//! linking this crate for its default HTTP clients shouldn't have to pull
//! in `sqlx`/`sqlite`/`pgvector` transitively. The `testing` feature's
//! in-process fakes ([`crate::fakes`]) convert between the two.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use soorma_types::Topic;
use uuid::Uuid;

// ---- Registry (spec §3.2) ----

/// Lifecycle state of an [`AgentRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Expired,
    Deregistered,
}

/// Canonical agent record returned by the Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub name: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub events_consumed: Vec<String>,
    pub events_produced: Vec<String>,
    pub endpoint_hint: Option<String>,
    pub tenant_scope: String,
    pub last_heartbeat_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub status: AgentStatus,
}

/// Registration input for `register_agent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub events_consumed: Vec<String>,
    #[serde(default)]
    pub events_produced: Vec<String>,
    pub endpoint_hint: Option<String>,
    pub tenant_scope: String,
    pub ttl_seconds: u64,
}

/// Structured discovery filter (spec §4.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverFilter {
    pub capability: Option<String>,
    pub consumes_event: Option<String>,
    pub produces_event: Option<String>,
    pub tenant_scope: Option<String>,
}

/// An event type known to the Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDefinition {
    pub event_name: String,
    pub topic: Topic,
    pub description: String,
    pub payload_schema_name: Option<String>,
    #[serde(default)]
    pub produced_by_agents: Vec<String>,
    #[serde(default)]
    pub consumed_by_agents: Vec<String>,
    pub tenant_scope: String,
}

/// A JSON Schema registered under `schema_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadSchema {
    pub schema_name: String,
    pub version: String,
    pub json_schema: Value,
    pub owner_agent_id: String,
}

// ---- Memory (spec §3.3) ----

/// Outcome of a semantic-memory upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Created,
    Updated,
    DuplicateSkipped,
}

/// A row in semantic memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticMemory {
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: String,
    pub is_public: bool,
    pub content: String,
    pub content_hash: String,
    pub external_id: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for `upsert_knowledge`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpsertKnowledgeRequest {
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
    pub external_id: Option<String>,
    #[serde(default)]
    pub is_public: bool,
}

/// Response envelope for `upsert_knowledge`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertKnowledgeResponse {
    pub id: Uuid,
    pub action: UpsertAction,
}

/// Speaker role in an episodic interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionRole {
    User,
    Assistant,
    System,
    Tool,
}

/// A row in episodic memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicMemory {
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub role: InteractionRole,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub occurred_at: DateTime<Utc>,
}

/// Request body for `log_interaction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogInteractionRequest {
    pub agent_id: String,
    pub role: InteractionRole,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Kind of stored procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcedureType {
    SystemPrompt,
    FewShotExample,
}

/// A row in procedural memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProceduralMemory {
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub trigger_condition: String,
    pub embedding: Option<Vec<f32>>,
    pub procedure_type: ProcedureType,
    pub content: String,
}

/// Per-request mutable state a worker owns until `complete()` (spec
/// §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub tenant_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub task_id: String,
    pub plan_id: Option<Uuid>,
    pub event_type: String,
    pub data: Value,
    pub response_event: Option<String>,
    pub response_topic: Option<String>,
    #[serde(default)]
    pub sub_tasks: Map<String, Value>,
    #[serde(default)]
    pub state: Map<String, Value>,
}

/// Lifecycle state of a [`PlanContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

/// Durable state-machine execution (spec §4.5 / Glossary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanContext {
    pub tenant_id: String,
    pub user_id: String,
    pub plan_id: Uuid,
    pub goal_event: String,
    pub goal_data: Value,
    pub state_machine: Value,
    pub current_state: String,
    pub results: Value,
    pub status: PlanStatus,
    pub correlation_id: String,
}

/// A top-level plan execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: Uuid,
    pub tenant_id: String,
    pub user_id: String,
    pub session_id: Option<Uuid>,
    pub goal: String,
    pub status: PlanStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Organizational container grouping related plans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub tenant_id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub session_metadata: Value,
}
