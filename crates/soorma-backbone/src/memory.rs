//! In-memory backbone implementation, grounded on the broadcast-channel
//! bus used throughout the reference workspace: a ring buffer per topic
//! plus a plain `Vec` retained log for replay. No persistence across
//! process restarts — suited to tests and single-process development.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use soorma_envelope::Envelope;
use soorma_types::{SoormaError, Topic};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{Backbone, RetentionPolicy};

const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

struct TopicChannel {
    tx: broadcast::Sender<Envelope>,
    log: Mutex<Vec<Envelope>>,
}

/// Simple in-memory, broadcast-backed backbone using Tokio channels plus a
/// retained `Vec` log per topic for replay-since-offset.
pub struct InMemoryBackbone {
    channels: HashMap<Topic, TopicChannel>,
}

impl Default for InMemoryBackbone {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl InMemoryBackbone {
    /// Create a new in-memory backbone with the given per-topic ring
    /// buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let channels = Topic::ALL
            .into_iter()
            .map(|topic| {
                let (tx, _rx) = broadcast::channel(capacity);
                (
                    topic,
                    TopicChannel {
                        tx,
                        log: Mutex::new(Vec::new()),
                    },
                )
            })
            .collect();
        Self { channels }
    }
}

#[async_trait]
impl Backbone for InMemoryBackbone {
    async fn commit(&self, envelope: &Envelope) -> Result<(), SoormaError> {
        let channel = self
            .channels
            .get(&envelope.topic)
            .ok_or_else(|| SoormaError::UnknownTopic(envelope.topic.to_string()))?;

        channel.log.lock().unwrap().push(envelope.clone());
        // Ignore lagging-receiver send errors: at-least-once delivery is
        // satisfied by replay_since, not by every broadcast succeeding.
        let _ = channel.tx.send(envelope.clone());
        Ok(())
    }

    async fn get(&self, topic: Topic, event_id: Uuid) -> Result<Option<Envelope>, SoormaError> {
        let channel = self
            .channels
            .get(&topic)
            .ok_or_else(|| SoormaError::UnknownTopic(topic.to_string()))?;
        let log = channel.log.lock().unwrap();
        Ok(log.iter().find(|e| e.event_id == event_id).cloned())
    }

    fn tail(&self, topic: Topic) -> broadcast::Receiver<Envelope> {
        match self.channels.get(&topic) {
            Some(channel) => channel.tx.subscribe(),
            None => broadcast::channel(1).0.subscribe(),
        }
    }

    async fn replay_since(
        &self,
        topic: Topic,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Envelope>, SoormaError> {
        let channel = self
            .channels
            .get(&topic)
            .ok_or_else(|| SoormaError::UnknownTopic(topic.to_string()))?;
        let log = channel.log.lock().unwrap();
        Ok(log
            .iter()
            .filter(|e| e.occurred_at >= since)
            .take(limit)
            .cloned()
            .collect())
    }

    fn retention_policy(&self, topic: Topic) -> RetentionPolicy {
        RetentionPolicy::default_for(topic)
    }

    async fn sweep_retention(&self) -> Result<u64, SoormaError> {
        let mut dropped = 0u64;
        for (topic, channel) in &self.channels {
            let policy = RetentionPolicy::default_for(*topic);
            let mut log = channel.log.lock().unwrap();
            if let Some(max_age) = policy.max_age {
                let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
                let before = log.len();
                log.retain(|e| e.occurred_at >= cutoff);
                dropped += (before - log.len()) as u64;
            }
            if let Some(max_events) = policy.max_events {
                let max_events = max_events as usize;
                if log.len() > max_events {
                    let excess = log.len() - max_events;
                    log.drain(0..excess);
                    dropped += excess as u64;
                }
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

    fn sample(topic: Topic) -> Envelope {
        EnvelopeBuilder::new("order.process.requested", topic, "t1")
            .data(json!({}))
            .announce()
            .unwrap()
    }

    #[tokio::test]
    async fn commit_and_tail_round_trip() {
        let bus = InMemoryBackbone::default();
        let mut rx = bus.tail(Topic::BusinessFacts);
        let envelope = sample(Topic::BusinessFacts);
        bus.commit(&envelope).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_id, envelope.event_id);
    }

    #[tokio::test]
    async fn get_finds_committed_envelope() {
        let bus = InMemoryBackbone::default();
        let envelope = sample(Topic::SystemEvents);
        bus.commit(&envelope).await.unwrap();
        let found = bus.get(Topic::SystemEvents, envelope.event_id).await.unwrap();
        assert_eq!(found.unwrap().event_id, envelope.event_id);
    }

    #[tokio::test]
    async fn replay_since_returns_only_recent_envelopes() {
        let bus = InMemoryBackbone::default();
        let cutoff = Utc::now();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let envelope = sample(Topic::Notifications);
        bus.commit(&envelope).await.unwrap();
        let replayed = bus.replay_since(Topic::Notifications, cutoff, 10).await.unwrap();
        assert_eq!(replayed.len(), 1);
    }

    #[tokio::test]
    async fn commit_rejects_unknown_topic_is_impossible_via_enum() {
        // Topic is a closed enum, so an "unknown topic" can only arise at
        // the HTTP edge (parsing a string); the backbone itself always
        // has a channel for every member of Topic::ALL.
        let bus = InMemoryBackbone::default();
        for topic in Topic::ALL {
            assert!(bus.get(topic, Uuid::new_v4()).await.is_ok());
        }
    }
}
