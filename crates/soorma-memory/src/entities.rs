//! Memory entities (spec §3.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a semantic-memory upsert (spec §4.4: "Returns `{id, action}`").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    /// No existing row matched; a new one was inserted.
    Created,
    /// An existing row matched and its content changed.
    Updated,
    /// An existing row matched with identical content; nothing changed.
    DuplicateSkipped,
}

/// A row in semantic memory — durable knowledge, private or public.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticMemory {
    /// Row identity.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: String,
    /// Owning user. Present even for public rows (the author).
    pub user_id: String,
    /// Visible to every user in the tenant when `true`.
    pub is_public: bool,
    /// The knowledge content.
    pub content: String,
    /// `sha256(content)`, hex-encoded. Drives dedup and embedding reuse.
    pub content_hash: String,
    /// Caller-supplied stable identity, takes upsert precedence over
    /// `content_hash` (spec §4.4 dedup precedence).
    pub external_id: Option<String>,
    /// Embedding vector, present once generated.
    pub embedding: Option<Vec<f32>>,
    /// Caller-supplied metadata.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for `upsert_knowledge`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertKnowledgeRequest {
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub external_id: Option<String>,
    #[serde(default)]
    pub is_public: bool,
}

/// Response envelope for `upsert_knowledge`.
#[derive(Debug, Clone, Serialize)]
pub struct UpsertKnowledgeResponse {
    pub id: Uuid,
    pub action: UpsertAction,
}

/// A row in episodic memory — an append-only conversational transcript.
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

/// Speaker role in an episodic interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionRole {
    User,
    Assistant,
    System,
    Tool,
}

/// Request body for `log_interaction`.
#[derive(Debug, Clone, Deserialize)]
pub struct LogInteractionRequest {
    pub agent_id: String,
    pub role: InteractionRole,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A row in procedural memory — reusable agent skills.
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

/// Kind of stored procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcedureType {
    SystemPrompt,
    FewShotExample,
}

/// A key/value row in working memory, scoped to a single plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryEntry {
    pub tenant_id: String,
    pub user_id: String,
    pub plan_id: Uuid,
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
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
    pub data: serde_json::Value,
    pub response_event: Option<String>,
    pub response_topic: Option<String>,
    /// `sub_task_correlation_id -> spec` for every child delegated via
    /// `delegate`/`delegate_parallel`. Used by `get_task_by_subtask`.
    #[serde(default)]
    pub sub_tasks: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub state: serde_json::Map<String, serde_json::Value>,
}

/// Durable state-machine execution (spec §4.5 / Glossary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanContext {
    pub tenant_id: String,
    pub user_id: String,
    pub plan_id: Uuid,
    pub goal_event: String,
    pub goal_data: serde_json::Value,
    pub state_machine: serde_json::Value,
    pub current_state: String,
    pub results: serde_json::Value,
    pub status: PlanStatus,
    /// Set by a `WAIT` action; the transition filter routes a matching
    /// incoming `event_type` back to this plan (spec §5 cancellation
    /// model).
    pub correlation_id: String,
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
    pub session_metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_action_serializes_to_snake_case() {
        assert_eq!(serde_json::to_string(&UpsertAction::DuplicateSkipped).unwrap(), "\"duplicate_skipped\"");
    }
}
