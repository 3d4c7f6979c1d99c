#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **soorma-backbone** – The message backbone abstraction (component C2).
//!
//! A durable, at-least-once topic log: envelopes are appended per topic and
//! can be tailed live (for SSE fan-out) or replayed from a point in time
//! (for subscribers resuming after a dropped connection). Queue-group
//! dispatch and `assigned_to` filtering are *not* backbone concerns — they
//! belong to the Event Bus service (C3), which tails this log and applies
//! routing rules on top.
//!
//! Two implementations ship here: [`InMemoryBackbone`] for tests and
//! single-process development, and [`SqliteBackbone`] for a durable,
//! file-backed deployment. Both implement the same [`Backbone`] trait so
//! the bus service is agnostic to which one it's wired against.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use soorma_envelope::Envelope;
use soorma_types::{SoormaError, Topic};
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryBackbone;
pub use sqlite::SqliteBackbone;

/// Per-topic retention policy (spec §9 Open Question 1: retention is
/// per-topic config, not a hard-coded constant).
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Drop envelopes older than this, if set.
    pub max_age: Option<Duration>,
    /// Keep at most this many envelopes per topic, if set (oldest dropped
    /// first).
    pub max_events: Option<u64>,
}

impl RetentionPolicy {
    /// Long retention, suited to durable domain events (`business-facts`,
    /// `audit`).
    pub fn long() -> Self {
        Self {
            max_age: Some(Duration::from_secs(30 * 24 * 60 * 60)),
            max_events: None,
        }
    }

    /// Short retention, suited to transient announcements
    /// (`notifications`, `system-events`).
    pub fn short() -> Self {
        Self {
            max_age: Some(Duration::from_secs(24 * 60 * 60)),
            max_events: Some(100_000),
        }
    }

    /// Default retention applied to the remaining fixed topics.
    pub fn default_for(topic: Topic) -> Self {
        match topic {
            Topic::BusinessFacts | Topic::Audit => Self::long(),
            Topic::Notifications | Topic::SystemEvents => Self::short(),
            _ => Self {
                max_age: Some(Duration::from_secs(7 * 24 * 60 * 60)),
                max_events: None,
            },
        }
    }
}

/// The message backbone abstraction: a durable, at-least-once topic log.
#[async_trait]
pub trait Backbone: Send + Sync {
    /// Append `envelope` to its topic's log and broadcast it to live
    /// tailers. Returns `BackboneUnavailable` if the underlying transport
    /// is down.
    async fn commit(&self, envelope: &Envelope) -> Result<(), SoormaError>;

    /// Fetch a single envelope by id within a topic, if still retained.
    async fn get(&self, topic: Topic, event_id: Uuid) -> Result<Option<Envelope>, SoormaError>;

    /// Subscribe to the live feed for `topic`. Lagging receivers may miss
    /// envelopes (spec: "beyond retention, lost").
    fn tail(&self, topic: Topic) -> broadcast::Receiver<Envelope>;

    /// Replay envelopes committed to `topic` at or after `since`, oldest
    /// first, capped at `limit`. Used to resume delivery after an SSE
    /// connection drops, within the backbone's retention window.
    async fn replay_since(
        &self,
        topic: Topic,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Envelope>, SoormaError>;

    /// The retention policy in effect for `topic`.
    fn retention_policy(&self, topic: Topic) -> RetentionPolicy;

    /// Drop envelopes that have aged out of retention. Returns the number
    /// of envelopes dropped. Intended to run on a periodic background
    /// task, not inline with publish.
    async fn sweep_retention(&self) -> Result<u64, SoormaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_defaults_are_sane_per_topic() {
        let business = RetentionPolicy::default_for(Topic::BusinessFacts);
        assert!(business.max_age.unwrap() > Duration::from_secs(24 * 60 * 60));

        let notif = RetentionPolicy::default_for(Topic::Notifications);
        assert!(notif.max_age.unwrap() <= Duration::from_secs(24 * 60 * 60));
    }
}
