//! Storage abstraction for the Registry service, mirroring the
//! `Backbone` trait's split between an in-memory and a `sqlx`-backed
//! implementation (spec §4.3 / §5: "Registry DB: relational, one schema
//! per (agents, events, schemas)").

use async_trait::async_trait;
use chrono::Duration;
use soorma_types::Result;

use crate::entities::{AgentDefinition, AgentRecord, DiscoverFilter, EventDefinition, PayloadSchema};

/// Persistence and lookup operations the Registry service's HTTP surface
/// delegates to. Implementors need not know about HTTP or envelopes —
/// lifecycle announcements are the handler layer's responsibility.
#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert by `agent_id`, replacing `events_consumed`/`events_produced`.
    async fn register_agent(&self, def: AgentDefinition) -> Result<AgentRecord>;

    /// Refresh `last_heartbeat_at` and revive an `Expired` record to
    /// `Active`. Returns `NotFound` if the agent was never registered or
    /// was explicitly deregistered.
    async fn heartbeat(&self, agent_id: &str) -> Result<AgentRecord>;

    /// Remove a record, returning it so the caller can announce its
    /// departure.
    async fn deregister(&self, agent_id: &str) -> Result<AgentRecord>;

    /// List active agents matching `filter`.
    async fn discover(&self, filter: DiscoverFilter) -> Result<Vec<AgentRecord>>;

    /// Upsert an event definition, unique by `(tenant_scope, event_name)`.
    async fn register_event(&self, def: EventDefinition) -> Result<EventDefinition>;

    /// List event definitions in `tenant_scope`, optionally restricted to
    /// a topic's wire name.
    async fn list_events(&self, tenant_scope: &str, topic: Option<&str>) -> Result<Vec<EventDefinition>>;

    /// Upsert a payload schema by `schema_name`.
    async fn register_schema(&self, schema: PayloadSchema) -> Result<PayloadSchema>;

    /// Fetch a payload schema by name.
    async fn get_schema(&self, schema_name: &str) -> Result<PayloadSchema>;

    /// Mark records whose TTL has lapsed `Expired`, then delete any
    /// already-`Expired` record whose grace window has also lapsed.
    /// Returns the records deleted in this sweep so the caller can
    /// announce their departure on `agent-lifecycle`.
    async fn sweep_expired(&self, grace: Duration) -> Result<Vec<AgentRecord>>;
}
