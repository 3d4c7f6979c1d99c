//! Registry entities (spec §3.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use soorma_types::Topic;

/// Lifecycle state of an [`AgentRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Heartbeating within its TTL window.
    Active,
    /// TTL exceeded; pending grace-window deletion.
    Expired,
    /// Explicitly removed by the agent or an operator.
    Deregistered,
}

/// Canonical agent record stored by the Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Stable identity, `name + ":" + version`.
    pub agent_id: String,
    /// Human-readable agent name.
    pub name: String,
    /// Agent version string.
    pub version: String,
    /// Free-text capability tags an LLM-driven discovery query can match.
    pub capabilities: Vec<String>,
    /// Event names this agent subscribes to.
    pub events_consumed: Vec<String>,
    /// Event names this agent publishes.
    pub events_produced: Vec<String>,
    /// Optional hint for out-of-band addressing (not used for routing).
    pub endpoint_hint: Option<String>,
    /// Tenant this agent instance serves.
    pub tenant_scope: String,
    /// Timestamp of the most recent heartbeat.
    pub last_heartbeat_at: DateTime<Utc>,
    /// Seconds of heartbeat silence tolerated before expiry.
    pub ttl_seconds: u64,
    /// Current lifecycle state.
    pub status: AgentStatus,
}

impl AgentRecord {
    /// The stable agent identity derived from `name` and `version`.
    pub fn agent_id(name: &str, version: &str) -> String {
        format!("{name}:{version}")
    }

    /// Whether this record's TTL has lapsed as of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.last_heartbeat_at);
        age.num_seconds() > self.ttl_seconds as i64
    }
}

/// Registration input for `register_agent`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentDefinition {
    /// Agent name.
    pub name: String,
    /// Agent version.
    pub version: String,
    /// Capability tags.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Event names consumed.
    #[serde(default)]
    pub events_consumed: Vec<String>,
    /// Event names produced.
    #[serde(default)]
    pub events_produced: Vec<String>,
    /// Optional addressing hint.
    pub endpoint_hint: Option<String>,
    /// Tenant this instance serves.
    pub tenant_scope: String,
    /// Heartbeat TTL in seconds.
    pub ttl_seconds: u64,
}

/// An event type known to the Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDefinition {
    /// Dotted event name, unique within `(tenant_scope, event_name)`.
    pub event_name: String,
    /// The fixed topic this event travels on.
    pub topic: Topic,
    /// Human-readable description (LLM-consumable).
    pub description: String,
    /// Payload schema registered under this name, if any.
    pub payload_schema_name: Option<String>,
    /// Agent ids that produce this event.
    #[serde(default)]
    pub produced_by_agents: Vec<String>,
    /// Agent ids that consume this event.
    #[serde(default)]
    pub consumed_by_agents: Vec<String>,
    /// Tenant this definition is scoped to.
    pub tenant_scope: String,
}

/// A JSON Schema registered under `schema_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadSchema {
    /// Unique name other envelopes reference via `payload_schema_name`.
    pub schema_name: String,
    /// Schema revision.
    pub version: String,
    /// The schema body.
    pub json_schema: serde_json::Value,
    /// Agent that owns/maintains this schema.
    pub owner_agent_id: String,
}

/// Structured discovery filter (spec §4.3: "the filter API itself is
/// structured").
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoverFilter {
    /// Match agents advertising this capability tag.
    pub capability: Option<String>,
    /// Match agents that consume this event name.
    pub consumes_event: Option<String>,
    /// Match agents that produce this event name.
    pub produces_event: Option<String>,
    /// Restrict to a tenant scope.
    pub tenant_scope: Option<String>,
}

impl DiscoverFilter {
    /// Whether `agent` satisfies every filter field that was set.
    pub fn matches(&self, agent: &AgentRecord) -> bool {
        if agent.status != AgentStatus::Active {
            return false;
        }
        if let Some(cap) = &self.capability {
            if !agent.capabilities.iter().any(|c| c == cap) {
                return false;
            }
        }
        if let Some(event) = &self.consumes_event {
            if !agent.events_consumed.iter().any(|e| e == event) {
                return false;
            }
        }
        if let Some(event) = &self.produces_event {
            if !agent.events_produced.iter().any(|e| e == event) {
                return false;
            }
        }
        if let Some(scope) = &self.tenant_scope {
            if &agent.tenant_scope != scope {
                return false;
            }
        }
        true
    }
}
