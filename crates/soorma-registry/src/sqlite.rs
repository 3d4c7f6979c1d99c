//! `sqlx`-backed `Store`, following `toka-store-sqlite`'s pool +
//! migration pattern: one `SqlitePool`, a `migrate()` step run once at
//! startup, and plain-SQL upserts.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use soorma_types::{Result, SoormaError, Topic};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::entities::{AgentDefinition, AgentRecord, AgentStatus, DiscoverFilter, EventDefinition, PayloadSchema};
use crate::store::Store;

/// Durable registry storage backed by SQLite.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if absent) the database at `path` and run migrations.
    pub async fn open(path: &str) -> Result<Self> {
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| SoormaError::Internal(format!("opening sqlite store: {e}")))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Build a store over an in-memory SQLite database (tests only).
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| SoormaError::Internal(format!("opening in-memory sqlite store: {e}")))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                agent_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                capabilities TEXT NOT NULL,
                events_consumed TEXT NOT NULL,
                events_produced TEXT NOT NULL,
                endpoint_hint TEXT,
                tenant_scope TEXT NOT NULL,
                last_heartbeat_at TEXT NOT NULL,
                ttl_seconds INTEGER NOT NULL,
                status TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SoormaError::Internal(format!("migrating agents table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                tenant_scope TEXT NOT NULL,
                event_name TEXT NOT NULL,
                topic TEXT NOT NULL,
                description TEXT NOT NULL,
                payload_schema_name TEXT,
                produced_by_agents TEXT NOT NULL,
                consumed_by_agents TEXT NOT NULL,
                PRIMARY KEY (tenant_scope, event_name)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SoormaError::Internal(format!("migrating events table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schemas (
                schema_name TEXT PRIMARY KEY,
                version TEXT NOT NULL,
                json_schema TEXT NOT NULL,
                owner_agent_id TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SoormaError::Internal(format!("migrating schemas table: {e}")))?;

        Ok(())
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn join_csv(items: &[String]) -> String {
    items.join(",")
}

fn split_csv(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        Vec::new()
    } else {
        raw.split(',').map(str::to_string).collect()
    }
}

fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Result<AgentRecord> {
    let status_raw: String = row.try_get("status").map_err(|e| SoormaError::Internal(e.to_string()))?;
    let status = match status_raw.as_str() {
        "active" => AgentStatus::Active,
        "expired" => AgentStatus::Expired,
        _ => AgentStatus::Deregistered,
    };
    let last_heartbeat_raw: String =
        row.try_get("last_heartbeat_at").map_err(|e| SoormaError::Internal(e.to_string()))?;
    let last_heartbeat_at = DateTime::parse_from_rfc3339(&last_heartbeat_raw)
        .map_err(|e| SoormaError::Internal(e.to_string()))?
        .with_timezone(&Utc);

    Ok(AgentRecord {
        agent_id: row.try_get("agent_id").map_err(|e| SoormaError::Internal(e.to_string()))?,
        name: row.try_get("name").map_err(|e| SoormaError::Internal(e.to_string()))?,
        version: row.try_get("version").map_err(|e| SoormaError::Internal(e.to_string()))?,
        capabilities: split_csv(&row.try_get::<String, _>("capabilities").map_err(|e| SoormaError::Internal(e.to_string()))?),
        events_consumed: split_csv(
            &row.try_get::<String, _>("events_consumed").map_err(|e| SoormaError::Internal(e.to_string()))?,
        ),
        events_produced: split_csv(
            &row.try_get::<String, _>("events_produced").map_err(|e| SoormaError::Internal(e.to_string()))?,
        ),
        endpoint_hint: row.try_get("endpoint_hint").map_err(|e| SoormaError::Internal(e.to_string()))?,
        tenant_scope: row.try_get("tenant_scope").map_err(|e| SoormaError::Internal(e.to_string()))?,
        last_heartbeat_at,
        ttl_seconds: row.try_get::<i64, _>("ttl_seconds").map_err(|e| SoormaError::Internal(e.to_string()))? as u64,
        status,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn register_agent(&self, def: AgentDefinition) -> Result<AgentRecord> {
        let agent_id = AgentRecord::agent_id(&def.name, &def.version);
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO agents (agent_id, name, version, capabilities, events_consumed, events_produced,
                                 endpoint_hint, tenant_scope, last_heartbeat_at, ttl_seconds, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'active')
            ON CONFLICT(agent_id) DO UPDATE SET
                capabilities = excluded.capabilities,
                events_consumed = excluded.events_consumed,
                events_produced = excluded.events_produced,
                endpoint_hint = excluded.endpoint_hint,
                tenant_scope = excluded.tenant_scope,
                last_heartbeat_at = excluded.last_heartbeat_at,
                ttl_seconds = excluded.ttl_seconds,
                status = 'active'
            "#,
        )
        .bind(&agent_id)
        .bind(&def.name)
        .bind(&def.version)
        .bind(join_csv(&def.capabilities))
        .bind(join_csv(&def.events_consumed))
        .bind(join_csv(&def.events_produced))
        .bind(&def.endpoint_hint)
        .bind(&def.tenant_scope)
        .bind(&now)
        .bind(def.ttl_seconds as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| SoormaError::Internal(format!("registering agent: {e}")))?;

        self.fetch_agent(&agent_id).await
    }

    async fn heartbeat(&self, agent_id: &str) -> Result<AgentRecord> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE agents SET last_heartbeat_at = ?1, status = 'active' WHERE agent_id = ?2 AND status != 'deregistered'",
        )
        .bind(&now)
        .bind(agent_id)
        .execute(&self.pool)
        .await
        .map_err(|e| SoormaError::Internal(format!("heartbeat: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(SoormaError::NotFound(format!("agent {agent_id} is not registered")));
        }
        self.fetch_agent(agent_id).await
    }

    async fn deregister(&self, agent_id: &str) -> Result<AgentRecord> {
        let record = self.fetch_agent(agent_id).await?;
        sqlx::query("DELETE FROM agents WHERE agent_id = ?1")
            .bind(agent_id)
            .execute(&self.pool)
            .await
            .map_err(|e| SoormaError::Internal(format!("deregistering agent: {e}")))?;
        Ok(AgentRecord { status: AgentStatus::Deregistered, ..record })
    }

    async fn discover(&self, filter: DiscoverFilter) -> Result<Vec<AgentRecord>> {
        let rows = sqlx::query("SELECT * FROM agents WHERE status = 'active'")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SoormaError::Internal(format!("listing agents: {e}")))?;
        rows.iter()
            .map(row_to_agent)
            .collect::<Result<Vec<_>>>()
            .map(|agents| agents.into_iter().filter(|a| filter.matches(a)).collect())
    }

    async fn register_event(&self, def: EventDefinition) -> Result<EventDefinition> {
        sqlx::query(
            r#"
            INSERT INTO events (tenant_scope, event_name, topic, description, payload_schema_name,
                                 produced_by_agents, consumed_by_agents)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(tenant_scope, event_name) DO UPDATE SET
                topic = excluded.topic,
                description = excluded.description,
                payload_schema_name = excluded.payload_schema_name,
                produced_by_agents = excluded.produced_by_agents,
                consumed_by_agents = excluded.consumed_by_agents
            "#,
        )
        .bind(&def.tenant_scope)
        .bind(&def.event_name)
        .bind(def.topic.as_str())
        .bind(&def.description)
        .bind(&def.payload_schema_name)
        .bind(join_csv(&def.produced_by_agents))
        .bind(join_csv(&def.consumed_by_agents))
        .execute(&self.pool)
        .await
        .map_err(|e| SoormaError::Internal(format!("registering event: {e}")))?;
        Ok(def)
    }

    async fn list_events(&self, tenant_scope: &str, topic: Option<&str>) -> Result<Vec<EventDefinition>> {
        let rows = sqlx::query("SELECT * FROM events WHERE tenant_scope = ?1")
            .bind(tenant_scope)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SoormaError::Internal(format!("listing events: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let topic_raw: String = row.try_get("topic").map_err(|e| SoormaError::Internal(e.to_string()))?;
            if let Some(want) = topic {
                if topic_raw != want {
                    continue;
                }
            }
            let parsed_topic = Topic::parse(&topic_raw)
                .ok_or_else(|| SoormaError::Internal(format!("corrupt topic in storage: {topic_raw}")))?;
            out.push(EventDefinition {
                event_name: row.try_get("event_name").map_err(|e| SoormaError::Internal(e.to_string()))?,
                topic: parsed_topic,
                description: row.try_get("description").map_err(|e| SoormaError::Internal(e.to_string()))?,
                payload_schema_name: row
                    .try_get("payload_schema_name")
                    .map_err(|e| SoormaError::Internal(e.to_string()))?,
                produced_by_agents: split_csv(
                    &row.try_get::<String, _>("produced_by_agents").map_err(|e| SoormaError::Internal(e.to_string()))?,
                ),
                consumed_by_agents: split_csv(
                    &row.try_get::<String, _>("consumed_by_agents").map_err(|e| SoormaError::Internal(e.to_string()))?,
                ),
                tenant_scope: row.try_get("tenant_scope").map_err(|e| SoormaError::Internal(e.to_string()))?,
            });
        }
        Ok(out)
    }

    async fn register_schema(&self, schema: PayloadSchema) -> Result<PayloadSchema> {
        let json_text = serde_json::to_string(&schema.json_schema).map_err(|e| SoormaError::Internal(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO schemas (schema_name, version, json_schema, owner_agent_id)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(schema_name) DO UPDATE SET
                version = excluded.version,
                json_schema = excluded.json_schema,
                owner_agent_id = excluded.owner_agent_id
            "#,
        )
        .bind(&schema.schema_name)
        .bind(&schema.version)
        .bind(json_text)
        .bind(&schema.owner_agent_id)
        .execute(&self.pool)
        .await
        .map_err(|e| SoormaError::Internal(format!("registering schema: {e}")))?;
        Ok(schema)
    }

    async fn get_schema(&self, schema_name: &str) -> Result<PayloadSchema> {
        let row = sqlx::query("SELECT * FROM schemas WHERE schema_name = ?1")
            .bind(schema_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SoormaError::Internal(format!("fetching schema: {e}")))?
            .ok_or_else(|| SoormaError::NotFound(format!("schema {schema_name} not found")))?;

        let json_text: String = row.try_get("json_schema").map_err(|e| SoormaError::Internal(e.to_string()))?;
        Ok(PayloadSchema {
            schema_name: row.try_get("schema_name").map_err(|e| SoormaError::Internal(e.to_string()))?,
            version: row.try_get("version").map_err(|e| SoormaError::Internal(e.to_string()))?,
            json_schema: serde_json::from_str(&json_text).map_err(|e| SoormaError::Internal(e.to_string()))?,
            owner_agent_id: row.try_get("owner_agent_id").map_err(|e| SoormaError::Internal(e.to_string()))?,
        })
    }

    async fn sweep_expired(&self, grace: Duration) -> Result<Vec<AgentRecord>> {
        let now = Utc::now();
        let rows = sqlx::query("SELECT * FROM agents WHERE status != 'deregistered'")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SoormaError::Internal(format!("scanning agents for sweep: {e}")))?;

        let mut deleted = Vec::new();
        for row in rows {
            let mut record = row_to_agent(&row)?;
            let age = now.signed_duration_since(record.last_heartbeat_at);
            if record.status == AgentStatus::Active && record.is_expired_at(now) {
                sqlx::query("UPDATE agents SET status = 'expired' WHERE agent_id = ?1")
                    .bind(&record.agent_id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| SoormaError::Internal(format!("marking agent expired: {e}")))?;
                record.status = AgentStatus::Expired;
            }
            if record.status == AgentStatus::Expired && age > Duration::seconds(record.ttl_seconds as i64) + grace {
                sqlx::query("DELETE FROM agents WHERE agent_id = ?1")
                    .bind(&record.agent_id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| SoormaError::Internal(format!("deleting expired agent: {e}")))?;
                deleted.push(record);
            }
        }
        Ok(deleted)
    }
}

impl SqliteStore {
    async fn fetch_agent(&self, agent_id: &str) -> Result<AgentRecord> {
        let row = sqlx::query("SELECT * FROM agents WHERE agent_id = ?1")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SoormaError::Internal(format!("fetching agent: {e}")))?
            .ok_or_else(|| SoormaError::NotFound(format!("agent {agent_id} is not registered")))?;
        row_to_agent(&row)
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
    async fn register_and_heartbeat_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.register_agent(sample_def()).await.unwrap();
        let refreshed = store.heartbeat("calculator:1.0.0").await.unwrap();
        assert_eq!(refreshed.status, AgentStatus::Active);
    }

    #[tokio::test]
    async fn heartbeat_after_deregister_is_not_found() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.register_agent(sample_def()).await.unwrap();
        store.deregister("calculator:1.0.0").await.unwrap();
        let err = store.heartbeat("calculator:1.0.0").await.unwrap_err();
        assert!(matches!(err, SoormaError::NotFound(_)));
    }

    #[tokio::test]
    async fn schema_round_trips_through_storage() {
        let store = SqliteStore::in_memory().await.unwrap();
        let schema = PayloadSchema {
            schema_name: "calc.add.v1".into(),
            version: "1".into(),
            json_schema: serde_json::json!({"type": "object"}),
            owner_agent_id: "calculator:1.0.0".into(),
        };
        store.register_schema(schema.clone()).await.unwrap();
        let fetched = store.get_schema("calc.add.v1").await.unwrap();
        assert_eq!(fetched.json_schema, schema.json_schema);
    }
}
