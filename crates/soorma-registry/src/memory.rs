//! In-memory `Store`, the default backend — a `DashMap` per entity kind,
//! mirroring `toka-bus-core`'s `Arc`-wrapped shared-state style.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use soorma_types::{Result, SoormaError};

use crate::entities::{AgentDefinition, AgentRecord, AgentStatus, DiscoverFilter, EventDefinition, PayloadSchema};
use crate::store::Store;

/// Volatile, process-local registry storage. Suitable for development and
/// tests; data does not survive a restart.
#[derive(Default)]
pub struct InMemoryStore {
    agents: DashMap<String, AgentRecord>,
    events: DashMap<(String, String), EventDefinition>,
    schemas: DashMap<String, PayloadSchema>,
}

impl InMemoryStore {
    /// Build an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn register_agent(&self, def: AgentDefinition) -> Result<AgentRecord> {
        let agent_id = AgentRecord::agent_id(&def.name, &def.version);
        let record = AgentRecord {
            agent_id: agent_id.clone(),
            name: def.name,
            version: def.version,
            capabilities: def.capabilities,
            events_consumed: def.events_consumed,
            events_produced: def.events_produced,
            endpoint_hint: def.endpoint_hint,
            tenant_scope: def.tenant_scope,
            last_heartbeat_at: Utc::now(),
            ttl_seconds: def.ttl_seconds,
            status: AgentStatus::Active,
        };
        self.agents.insert(agent_id, record.clone());
        Ok(record)
    }

    async fn heartbeat(&self, agent_id: &str) -> Result<AgentRecord> {
        let mut entry = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| SoormaError::NotFound(format!("agent {agent_id} is not registered")))?;
        if entry.status == AgentStatus::Deregistered {
            return Err(SoormaError::NotFound(format!("agent {agent_id} is not registered")));
        }
        entry.last_heartbeat_at = Utc::now();
        entry.status = AgentStatus::Active;
        Ok(entry.clone())
    }

    async fn deregister(&self, agent_id: &str) -> Result<AgentRecord> {
        let (_, mut record) = self
            .agents
            .remove(agent_id)
            .ok_or_else(|| SoormaError::NotFound(format!("agent {agent_id} is not registered")))?;
        record.status = AgentStatus::Deregistered;
        Ok(record)
    }

    async fn discover(&self, filter: DiscoverFilter) -> Result<Vec<AgentRecord>> {
        Ok(self
            .agents
            .iter()
            .map(|e| e.value().clone())
            .filter(|a| filter.matches(a))
            .collect())
    }

    async fn register_event(&self, def: EventDefinition) -> Result<EventDefinition> {
        let key = (def.tenant_scope.clone(), def.event_name.clone());
        self.events.insert(key, def.clone());
        Ok(def)
    }

    async fn list_events(&self, tenant_scope: &str, topic: Option<&str>) -> Result<Vec<EventDefinition>> {
        Ok(self
            .events
            .iter()
            .map(|e| e.value().clone())
            .filter(|e| e.tenant_scope == tenant_scope)
            .filter(|e| topic.map(|t| e.topic.as_str() == t).unwrap_or(true))
            .collect())
    }

    async fn register_schema(&self, schema: PayloadSchema) -> Result<PayloadSchema> {
        self.schemas.insert(schema.schema_name.clone(), schema.clone());
        Ok(schema)
    }

    async fn get_schema(&self, schema_name: &str) -> Result<PayloadSchema> {
        self.schemas
            .get(schema_name)
            .map(|e| e.value().clone())
            .ok_or_else(|| SoormaError::NotFound(format!("schema {schema_name} not found")))
    }

    async fn sweep_expired(&self, grace: Duration) -> Result<Vec<AgentRecord>> {
        let now = Utc::now();
        let mut deleted = Vec::new();
        let mut to_delete = Vec::new();

        for mut entry in self.agents.iter_mut() {
            let record = entry.value_mut();
            if record.status == AgentStatus::Deregistered {
                continue;
            }
            let age = now.signed_duration_since(record.last_heartbeat_at);
            if record.status == AgentStatus::Active && record.is_expired_at(now) {
                record.status = AgentStatus::Expired;
            }
            if record.status == AgentStatus::Expired && age > Duration::seconds(record.ttl_seconds as i64) + grace {
                to_delete.push(record.agent_id.clone());
            }
        }

        for agent_id in to_delete {
            if let Some((_, record)) = self.agents.remove(&agent_id) {
                deleted.push(record);
            }
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_def() -> AgentDefinition {
        AgentDefinition {
            name: "calculator".into(),
            version: "1.0.0".into(),
            capabilities: vec!["arithmetic".into()],
            events_consumed: vec!["calc.add.requested".into()],
            events_produced: vec!["calc.add.done".into()],
            endpoint_hint: None,
            tenant_scope: "t1".into(),
            ttl_seconds: 30,
        }
    }

    #[tokio::test]
    async fn register_then_discover_by_capability() {
        let store = InMemoryStore::new();
        store.register_agent(sample_def()).await.unwrap();
        let found = store
            .discover(DiscoverFilter { capability: Some("arithmetic".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].agent_id, "calculator:1.0.0");
    }

    #[tokio::test]
    async fn heartbeat_unknown_agent_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.heartbeat("ghost:1.0.0").await.unwrap_err();
        assert!(matches!(err, SoormaError::NotFound(_)));
    }

    #[tokio::test]
    async fn deregister_removes_agent_from_discovery() {
        let store = InMemoryStore::new();
        store.register_agent(sample_def()).await.unwrap();
        store.deregister("calculator:1.0.0").await.unwrap();
        let found = store.discover(DiscoverFilter::default()).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn sweep_expired_deletes_only_past_grace_window() {
        let store = InMemoryStore::new();
        let mut def = sample_def();
        def.ttl_seconds = 0;
        store.register_agent(def).await.unwrap();

        let deleted = store.sweep_expired(Duration::seconds(60)).await.unwrap();
        assert!(deleted.is_empty(), "within grace window, should not delete yet");

        let agent = store.agents.get("calculator:1.0.0").unwrap();
        assert_eq!(agent.status, AgentStatus::Expired);
        drop(agent);

        let deleted = store.sweep_expired(Duration::seconds(-1)).await.unwrap();
        assert_eq!(deleted.len(), 1);
    }
}
