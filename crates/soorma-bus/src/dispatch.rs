//! Routing rules for the Event Bus service (spec §4.2).
//!
//! The backbone only knows about topics; everything about *who* gets a
//! copy of a given envelope — queue-group load balancing, `assigned_to`
//! targeting, and dead-lettering after retry exhaustion — lives here.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use soorma_backbone::Backbone;
use soorma_envelope::Envelope;
use soorma_types::{SoormaError, Topic};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;
use uuid::Uuid;

/// Maximum delivery attempts to a queue-group member before an envelope is
/// copied to `dead-letter` (spec §4.2 failure model).
pub const MAX_DELIVERY_ATTEMPTS: u32 = 5;

/// How long a queue-group member has to `ack` before the envelope is
/// considered lost and redelivered to another member.
pub const ACK_DEADLINE: Duration = Duration::from_secs(30);

/// Per-subscription filter, built from the `GET /v1/events/stream` query
/// string (spec §4.2, §6.2).
#[derive(Debug, Clone)]
pub struct SubscribeFilter {
    /// Topic to subscribe to.
    pub topic: Topic,
    /// Prefix match against `event_type`, if set.
    pub event_type_prefix: Option<String>,
    /// Caller's authenticated tenant; envelopes for other tenants never
    /// reach this subscription.
    pub tenant_id: String,
    /// This subscriber's own agent identity. Doubles as the `assigned_to`
    /// match key: envelopes whose `assigned_to` is set only reach
    /// subscribers whose `assigned_to` equals it.
    pub assigned_to: Option<String>,
    /// Queue group name. Subscribers sharing a group compete for each
    /// envelope; subscribers without one get every matching envelope
    /// (pure broadcast).
    pub queue_group: Option<String>,
}

impl SubscribeFilter {
    /// Whether `envelope` should be handed to a subscriber with this
    /// filter, ignoring group membership (which the dispatcher already
    /// resolved before calling this).
    pub fn matches(&self, envelope: &Envelope) -> bool {
        if envelope.topic != self.topic {
            return false;
        }
        if envelope.tenant_id != self.tenant_id {
            return false;
        }
        if let Some(prefix) = &self.event_type_prefix {
            if !envelope.event_type.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(target) = &envelope.assigned_to {
            if self.assigned_to.as_deref() != Some(target.as_str()) {
                return false;
            }
        }
        true
    }
}

struct GroupMember {
    id: Uuid,
    assigned_to: Option<String>,
    sender: mpsc::Sender<Envelope>,
}

struct GroupState {
    members: Vec<GroupMember>,
    next: AtomicUsize,
}

struct PendingAck {
    envelope: Envelope,
    topic: Topic,
    group: String,
    attempts: u32,
    deadline: chrono::DateTime<Utc>,
}

/// Owns queue-group membership and in-flight acknowledgement tracking for
/// one Event Bus process.
pub struct Dispatcher {
    backbone: Arc<dyn Backbone>,
    groups: DashMap<(Topic, String), Mutex<GroupState>>,
    pending: DashMap<Uuid, PendingAck>,
}

impl Dispatcher {
    /// Build a dispatcher over `backbone`.
    pub fn new(backbone: Arc<dyn Backbone>) -> Self {
        Self {
            backbone,
            groups: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    /// Register a new group member and return its channel. Called once
    /// per SSE connection that declares a `queue_group`.
    pub fn join_group(
        &self,
        topic: Topic,
        group: &str,
        assigned_to: Option<String>,
    ) -> (Uuid, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(256);
        let member_id = Uuid::new_v4();
        let key = (topic, group.to_string());
        let mut entry = self
            .groups
            .entry(key)
            .or_insert_with(|| Mutex::new(GroupState { members: Vec::new(), next: AtomicUsize::new(0) }));
        entry
            .value_mut()
            .get_mut()
            .members
            .push(GroupMember { id: member_id, assigned_to, sender: tx });
        (member_id, rx)
    }

    /// Remove a member from a group, e.g. on SSE disconnect.
    pub async fn leave_group(&self, topic: Topic, group: &str, member_id: Uuid) {
        if let Some(entry) = self.groups.get(&(topic, group.to_string())) {
            let mut state = entry.lock().await;
            state.members.retain(|m| m.id != member_id);
        }
    }

    /// Dispatch `envelope` to the queue group `group` on its topic,
    /// honoring `assigned_to` precedence (spec §9 OQ2): if the envelope
    /// targets a specific agent, deliver only to the matching member
    /// (direct delivery), bypassing round robin; otherwise round-robin
    /// across all members (competing consumers).
    pub async fn dispatch_to_group(&self, envelope: &Envelope, group: &str) -> bool {
        let key = (envelope.topic, group.to_string());
        let Some(entry) = self.groups.get(&key) else { return false };
        let state = entry.lock().await;
        if state.members.is_empty() {
            return false;
        }

        let target = if let Some(assigned) = &envelope.assigned_to {
            state.members.iter().find(|m| m.assigned_to.as_deref() == Some(assigned.as_str()))
        } else {
            let idx = state.next.fetch_add(1, Ordering::Relaxed) % state.members.len();
            state.members.get(idx)
        };

        let Some(member) = target else { return false };
        let delivered = member.sender.try_send(envelope.clone()).is_ok();

        if delivered {
            self.pending.insert(
                envelope.event_id,
                PendingAck {
                    envelope: envelope.clone(),
                    topic: envelope.topic,
                    group: group.to_string(),
                    attempts: 1,
                    deadline: Utc::now() + chrono::Duration::from_std(ACK_DEADLINE).unwrap(),
                },
            );
        }
        delivered
    }

    /// Acknowledge successful handling of `event_id`, clearing it from
    /// the redelivery tracker.
    pub fn ack(&self, event_id: Uuid) {
        self.pending.remove(&event_id);
    }

    /// Fan `envelope` out to every distinct queue group registered on its
    /// topic (spec §4.2: "Multiple distinct groups on the same topic each
    /// receive a copy"). Pure-broadcast subscribers don't go through
    /// this path — they tail the backbone directly.
    pub async fn dispatch_envelope(&self, envelope: &Envelope) {
        let groups: Vec<String> = self
            .groups
            .iter()
            .filter(|entry| entry.key().0 == envelope.topic)
            .map(|entry| entry.key().1.clone())
            .collect();
        for group in groups {
            self.dispatch_to_group(envelope, &group).await;
        }
    }

    /// One sweep of the redelivery/dead-letter loop (spec §4.2 failure
    /// model): envelopes past their ack deadline are redelivered; past
    /// `MAX_DELIVERY_ATTEMPTS`, they're copied to `dead-letter` instead.
    pub async fn sweep_pending_acks(&self) -> Result<(), SoormaError> {
        let now = Utc::now();
        let expired: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| *entry.key())
            .collect();

        for event_id in expired {
            let Some((_, mut pending)) = self.pending.remove(&event_id) else { continue };
            if pending.attempts >= MAX_DELIVERY_ATTEMPTS {
                warn!(%event_id, topic = %pending.topic, "undeliverable after max attempts, dead-lettering");
                let dead_letter = dead_letter_envelope(&pending.envelope);
                self.backbone.commit(&dead_letter).await?;
                continue;
            }
            pending.attempts += 1;
            pending.deadline = now + chrono::Duration::from_std(ACK_DEADLINE).unwrap();
            let redelivered = self.dispatch_to_group(&pending.envelope, &pending.group).await;
            if redelivered {
                // dispatch_to_group re-inserted a fresh PendingAck with
                // attempts=1; overwrite with our carried attempt count.
                if let Some(mut fresh) = self.pending.get_mut(&event_id) {
                    fresh.attempts = pending.attempts;
                }
            } else {
                self.pending.insert(event_id, pending);
            }
        }
        Ok(())
    }

}

/// Build the `dead-letter` copy of an undeliverable envelope: same event
/// data, fresh `event_id`, `parent_event_id` set to the original.
pub fn dead_letter_envelope(original: &Envelope) -> Envelope {
    let mut copy = original.clone();
    copy.parent_event_id = Some(original.event_id);
    copy.event_id = Uuid::new_v4();
    copy.topic = Topic::DeadLetter;
    copy.occurred_at = Utc::now();
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use soorma_backbone::InMemoryBackbone;
    use soorma_envelope::EnvelopeBuilder;

    fn envelope(topic: Topic, assigned_to: Option<&str>) -> Envelope {
        let mut builder = EnvelopeBuilder::new("order.process.requested", topic, "t1");
        if let Some(a) = assigned_to {
            builder = builder.assigned_to(a);
        }
        builder.data(json!({})).announce().unwrap()
    }

    #[tokio::test]
    async fn round_robin_distributes_across_group_members() {
        let dispatcher = Dispatcher::new(Arc::new(InMemoryBackbone::default()));
        let (_id_a, mut rx_a) = dispatcher.join_group(Topic::ActionRequests, "workers", None);
        let (_id_b, mut rx_b) = dispatcher.join_group(Topic::ActionRequests, "workers", None);

        for _ in 0..10 {
            let env = envelope(Topic::ActionRequests, None);
            assert!(dispatcher.dispatch_to_group(&env, "workers").await);
        }

        let mut count_a = 0;
        let mut count_b = 0;
        while rx_a.try_recv().is_ok() {
            count_a += 1;
        }
        while rx_b.try_recv().is_ok() {
            count_b += 1;
        }
        assert_eq!(count_a + count_b, 10);
        assert!(count_a > 0 && count_b > 0);
    }

    #[tokio::test]
    async fn assigned_to_bypasses_round_robin() {
        let dispatcher = Dispatcher::new(Arc::new(InMemoryBackbone::default()));
        let (_id_a, mut rx_a) = dispatcher.join_group(Topic::ActionRequests, "workers", Some("agent-a".into()));
        let (_id_b, mut rx_b) = dispatcher.join_group(Topic::ActionRequests, "workers", Some("agent-b".into()));

        let env = envelope(Topic::ActionRequests, Some("agent-b"));
        assert!(dispatcher.dispatch_to_group(&env, "workers").await);

        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap().event_id, env.event_id);
    }

    #[tokio::test]
    async fn ack_clears_pending_redelivery() {
        let dispatcher = Dispatcher::new(Arc::new(InMemoryBackbone::default()));
        let (_id, mut rx) = dispatcher.join_group(Topic::ActionRequests, "workers", None);
        let env = envelope(Topic::ActionRequests, None);
        dispatcher.dispatch_to_group(&env, "workers").await;
        let _ = rx.try_recv();
        dispatcher.ack(env.event_id);
        assert!(dispatcher.pending.get(&env.event_id).is_none());
    }

    #[tokio::test]
    async fn distinct_groups_on_same_topic_each_get_a_copy() {
        // Scenario S4: two "workers" competing consumers plus one
        // "auditors" group on the same topic — workers split 100
        // envelopes between them, auditors gets all 100.
        let dispatcher = Dispatcher::new(Arc::new(InMemoryBackbone::default()));
        let (_a, mut worker_a) = dispatcher.join_group(Topic::ActionRequests, "workers", None);
        let (_b, mut worker_b) = dispatcher.join_group(Topic::ActionRequests, "workers", None);
        let (_c, mut auditor) = dispatcher.join_group(Topic::ActionRequests, "auditors", None);

        for _ in 0..100 {
            let env = envelope(Topic::ActionRequests, None);
            dispatcher.dispatch_envelope(&env).await;
        }

        let mut worker_total = 0;
        while worker_a.try_recv().is_ok() {
            worker_total += 1;
        }
        while worker_b.try_recv().is_ok() {
            worker_total += 1;
        }
        assert_eq!(worker_total, 100);

        let mut auditor_total = 0;
        while auditor.try_recv().is_ok() {
            auditor_total += 1;
        }
        assert_eq!(auditor_total, 100);
    }

    #[test]
    fn dead_letter_envelope_preserves_original_as_parent() {
        let original = envelope(Topic::ActionRequests, None);
        let dead = dead_letter_envelope(&original);
        assert_eq!(dead.parent_event_id, Some(original.event_id));
        assert_eq!(dead.topic, Topic::DeadLetter);
        assert_ne!(dead.event_id, original.event_id);
    }
}
