//! SQLite-backed durable backbone, grounded on the reference workspace's
//! `sqlx`-based storage driver: an append-only table plus a broadcast
//! channel per topic for live tailing, migrated on open.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use soorma_envelope::Envelope;
use soorma_types::{SoormaError, Topic};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{Backbone, RetentionPolicy};

const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

/// Durable, file-backed backbone using SQLite via `sqlx`. Each topic's
/// envelopes live in one table, deduplicated by `event_id`; live tailers
/// subscribe to an in-process broadcast channel populated on every commit.
pub struct SqliteBackbone {
    pool: SqlitePool,
    channels: HashMap<Topic, broadcast::Sender<Envelope>>,
}

impl SqliteBackbone {
    /// Open (creating if absent) a SQLite database at `path` and run
    /// migrations.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, SoormaError> {
        let database_url = format!("sqlite://{}?mode=rwc", path.as_ref().display());
        let pool = SqlitePool::connect(&database_url)
            .await
            .map_err(|e| SoormaError::BackboneUnavailable(e.to_string()))?;
        Self::from_pool(pool).await
    }

    /// Open an in-memory SQLite database. Useful for integration tests
    /// that want SQL semantics without a file on disk.
    pub async fn in_memory() -> Result<Self, SoormaError> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(|e| SoormaError::BackboneUnavailable(e.to_string()))?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, SoormaError> {
        let backbone = Self {
            pool,
            channels: Topic::ALL
                .into_iter()
                .map(|t| (t, broadcast::channel(DEFAULT_BROADCAST_CAPACITY).0))
                .collect(),
        };
        backbone.migrate().await?;
        Ok(backbone)
    }

    async fn migrate(&self) -> Result<(), SoormaError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS envelopes (
                event_id TEXT PRIMARY KEY,
                topic TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                data BLOB NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SoormaError::BackboneUnavailable(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_envelopes_topic_time ON envelopes(topic, occurred_at)")
            .execute(&self.pool)
            .await
            .map_err(|e| SoormaError::BackboneUnavailable(e.to_string()))?;

        Ok(())
    }

    /// Close the underlying connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Backbone for SqliteBackbone {
    async fn commit(&self, envelope: &Envelope) -> Result<(), SoormaError> {
        let payload =
            serde_json::to_vec(envelope).map_err(|e| SoormaError::InvalidEnvelope(e.to_string()))?;

        sqlx::query(
            "INSERT OR REPLACE INTO envelopes (event_id, topic, occurred_at, data) VALUES (?, ?, ?, ?)",
        )
        .bind(envelope.event_id.to_string())
        .bind(envelope.topic.as_str())
        .bind(envelope.occurred_at.to_rfc3339())
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| SoormaError::BackboneUnavailable(e.to_string()))?;

        if let Some(tx) = self.channels.get(&envelope.topic) {
            let _ = tx.send(envelope.clone());
        }

        Ok(())
    }

    async fn get(&self, topic: Topic, event_id: Uuid) -> Result<Option<Envelope>, SoormaError> {
        let row = sqlx::query("SELECT data FROM envelopes WHERE event_id = ? AND topic = ?")
            .bind(event_id.to_string())
            .bind(topic.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SoormaError::BackboneUnavailable(e.to_string()))?;

        match row {
            Some(row) => {
                let bytes: Vec<u8> = row.get("data");
                let envelope = serde_json::from_slice(&bytes)
                    .map_err(|e| SoormaError::Internal(format!("corrupt envelope row: {e}")))?;
                Ok(Some(envelope))
            }
            None => Ok(None),
        }
    }

    fn tail(&self, topic: Topic) -> broadcast::Receiver<Envelope> {
        match self.channels.get(&topic) {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).0.subscribe(),
        }
    }

    async fn replay_since(
        &self,
        topic: Topic,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Envelope>, SoormaError> {
        let rows = sqlx::query(
            "SELECT data FROM envelopes WHERE topic = ? AND occurred_at >= ? ORDER BY occurred_at ASC LIMIT ?",
        )
        .bind(topic.as_str())
        .bind(since.to_rfc3339())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SoormaError::BackboneUnavailable(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let bytes: Vec<u8> = row.get("data");
                serde_json::from_slice(&bytes)
                    .map_err(|e| SoormaError::Internal(format!("corrupt envelope row: {e}")))
            })
            .collect()
    }

    fn retention_policy(&self, topic: Topic) -> RetentionPolicy {
        RetentionPolicy::default_for(topic)
    }

    async fn sweep_retention(&self) -> Result<u64, SoormaError> {
        let mut dropped = 0u64;
        for topic in Topic::ALL {
            let policy = RetentionPolicy::default_for(topic);
            if let Some(max_age) = policy.max_age {
                let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
                let result = sqlx::query("DELETE FROM envelopes WHERE topic = ? AND occurred_at < ?")
                    .bind(topic.as_str())
                    .bind(cutoff.to_rfc3339())
                    .execute(&self.pool)
                    .await
                    .map_err(|e| SoormaError::BackboneUnavailable(e.to_string()))?;
                dropped += result.rows_affected();
            }
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use soorma_envelope::EnvelopeBuilder;

    async fn backbone() -> SqliteBackbone {
        SqliteBackbone::in_memory().await.unwrap()
    }

    fn sample(topic: Topic) -> Envelope {
        EnvelopeBuilder::new("order.process.requested", topic, "t1")
            .data(json!({}))
            .announce()
            .unwrap()
    }

    #[tokio::test]
    async fn commit_persists_and_get_retrieves() {
        let backbone = backbone().await;
        let envelope = sample(Topic::BusinessFacts);
        backbone.commit(&envelope).await.unwrap();
        let fetched = backbone.get(Topic::BusinessFacts, envelope.event_id).await.unwrap();
        assert_eq!(fetched.unwrap().event_id, envelope.event_id);
    }

    #[tokio::test]
    async fn commit_broadcasts_to_live_tailers() {
        let backbone = backbone().await;
        let mut rx = backbone.tail(Topic::Audit);
        let envelope = sample(Topic::Audit);
        backbone.commit(&envelope).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_id, envelope.event_id);
    }

    #[tokio::test]
    async fn replay_since_filters_by_time() {
        let backbone = backbone().await;
        let cutoff = Utc::now();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let envelope = sample(Topic::DeadLetter);
        backbone.commit(&envelope).await.unwrap();
        let replayed = backbone.replay_since(Topic::DeadLetter, cutoff, 10).await.unwrap();
        assert_eq!(replayed.len(), 1);
    }
}
