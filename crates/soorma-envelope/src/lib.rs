#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **soorma-envelope** – The canonical event envelope, its three publishing
//! idioms (request / respond / announce), and the correlation-router
//! invariants every component in Soorma Core must enforce.
//!
//! This crate is pure: no I/O, no storage, no transport. The Event Bus,
//! Registry, and Memory services all depend on it for a single shared
//! definition of "what an event looks like on the wire".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use soorma_types::{SessionId, SoormaError, TenantId, Topic, UserId};
use uuid::Uuid;

pub mod router;

pub use router::{create_child_request, respond, validate_response};

/// Globally unique identifier for an envelope.
pub type EventId = Uuid;

/// Identifies a request/response pair or a plan execution. Stored as a
/// plain string because it may carry a `plan_id` (UUID) or an arbitrary
/// sub-task correlation token minted by a worker.
pub type CorrelationId = String;

/// The canonical event envelope (spec §3.1). Every field that travels the
/// wire lives here; nothing about routing is inferred — `topic` is always
/// explicit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Globally unique identifier, assigned on publish if absent.
    pub event_id: EventId,
    /// Semantic, dotted event name (e.g. `order.process.requested`). Not a
    /// topic.
    pub event_type: String,
    /// One of the eight fixed topics. Mandatory, never inferred.
    pub topic: Topic,
    /// Scopes all downstream access. Mandatory.
    pub tenant_id: TenantId,
    /// End-user or agent identity.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<UserId>,
    /// Groups related plans.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<SessionId>,
    /// Identifies a request/response pair or plan execution.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_id: Option<CorrelationId>,
    /// Immediate parent in the causal tree.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_event_id: Option<EventId>,
    /// Root of the causal tree; copied from root, never rewritten.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub trace_id: Option<Uuid>,
    /// The `event_type` a responder must use when replying.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response_event: Option<String>,
    /// Defaults to `action-results` when unset.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response_topic: Option<Topic>,
    /// Names a schema registered in the Registry service.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload_schema_name: Option<String>,
    /// Opaque JSON payload.
    pub data: serde_json::Value,
    /// Monotonic producer timestamp.
    pub occurred_at: DateTime<Utc>,
    /// Agent identity filter used for targeted delivery.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub assigned_to: Option<String>,
}

impl Envelope {
    /// Resolve the correlation id a responder must echo: the request's
    /// `correlation_id` if set, else its `event_id`. Spec §3.1: "If
    /// `response_event` is set, the responder MUST publish its reply with
    /// `correlation_id` equal to the request's `correlation_id` (or
    /// `event_id` if no `correlation_id` was set)".
    pub fn effective_correlation_id(&self) -> CorrelationId {
        self.correlation_id
            .clone()
            .unwrap_or_else(|| self.event_id.to_string())
    }

    /// The topic a responder must publish to: `response_topic` if set,
    /// else `action-results`.
    pub fn effective_response_topic(&self) -> Topic {
        self.response_topic.unwrap_or(Topic::ActionResults)
    }

    /// Validate the invariants of spec §3.1 that apply to every envelope
    /// regardless of publishing idiom. Assigns nothing — a pure check.
    pub fn validate(&self) -> Result<(), SoormaError> {
        if self.tenant_id.trim().is_empty() {
            return Err(SoormaError::InvalidEnvelope("tenant_id is required".into()));
        }
        if self.event_type.trim().is_empty() {
            return Err(SoormaError::InvalidEnvelope("event_type is required".into()));
        }
        if self.topic == Topic::ActionRequests && self.response_event.is_none() {
            return Err(SoormaError::InvalidEnvelope(
                "action-requests envelopes must set response_event".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for constructing new outbound envelopes with sensible defaults
/// (`event_id` and `occurred_at` are always assigned fresh; callers never
/// set them directly).
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    event_type: String,
    topic: Topic,
    tenant_id: TenantId,
    user_id: Option<UserId>,
    session_id: Option<SessionId>,
    correlation_id: Option<CorrelationId>,
    parent_event_id: Option<EventId>,
    trace_id: Option<Uuid>,
    response_event: Option<String>,
    response_topic: Option<Topic>,
    payload_schema_name: Option<String>,
    data: serde_json::Value,
    assigned_to: Option<String>,
}

impl EnvelopeBuilder {
    /// Start building an envelope for `event_type` on `topic`, scoped to
    /// `tenant_id`.
    pub fn new(event_type: impl Into<String>, topic: Topic, tenant_id: impl Into<TenantId>) -> Self {
        Self {
            event_type: event_type.into(),
            topic,
            tenant_id: tenant_id.into(),
            user_id: None,
            session_id: None,
            correlation_id: None,
            parent_event_id: None,
            trace_id: None,
            response_event: None,
            response_topic: None,
            payload_schema_name: None,
            data: serde_json::Value::Null,
            assigned_to: None,
        }
    }

    /// Set the `data` payload.
    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Set `user_id`.
    pub fn user_id(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set `session_id`.
    pub fn session_id(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set `correlation_id` explicitly (otherwise the **request** idiom
    /// generates a fresh one).
    pub fn correlation_id(mut self, correlation_id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set `assigned_to`.
    pub fn assigned_to(mut self, agent_id: impl Into<String>) -> Self {
        self.assigned_to = Some(agent_id.into());
        self
    }

    /// Set `payload_schema_name`.
    pub fn payload_schema_name(mut self, name: impl Into<String>) -> Self {
        self.payload_schema_name = Some(name.into());
        self
    }

    /// Set `response_topic` explicitly, overriding the `action-results`
    /// default.
    pub fn response_topic(mut self, topic: Topic) -> Self {
        self.response_topic = Some(topic);
        self
    }

    fn build_raw(self, trace_id: Option<Uuid>, parent_event_id: Option<EventId>) -> Envelope {
        let event_id = Uuid::new_v4();
        Envelope {
            event_id,
            event_type: self.event_type,
            topic: self.topic,
            tenant_id: self.tenant_id,
            user_id: self.user_id,
            session_id: self.session_id,
            correlation_id: self.correlation_id,
            parent_event_id,
            trace_id: trace_id.or(Some(event_id)),
            response_event: self.response_event,
            response_topic: self.response_topic,
            payload_schema_name: self.payload_schema_name,
            data: self.data,
            occurred_at: Utc::now(),
            assigned_to: self.assigned_to,
        }
    }

    /// **request**: `topic=action-requests`, `response_event` MUST be set,
    /// `correlation_id` defaults to a fresh UUID if unset.
    pub fn request(mut self, response_event: impl Into<String>) -> Envelope {
        self.topic = Topic::ActionRequests;
        self.response_event = Some(response_event.into());
        if self.correlation_id.is_none() {
            self.correlation_id = Some(Uuid::new_v4().to_string());
        }
        self.build_raw(None, None)
    }

    /// **announce**: any topic other than `action-results`; no response
    /// expected, `correlation_id` optional. Fails fast if misused for
    /// `action-results`, which is reserved for `respond`.
    pub fn announce(self) -> Result<Envelope, SoormaError> {
        if self.topic == Topic::ActionResults {
            return Err(SoormaError::InvalidEnvelope(
                "announce must not target action-results; use respond".into(),
            ));
        }
        Ok(self.build_raw(None, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_request() -> Envelope {
        EnvelopeBuilder::new("calc.add.requested", Topic::ActionRequests, "t1")
            .user_id("u1")
            .correlation_id("c-1")
            .data(json!({"a": 2, "b": 3}))
            .request("calc.add.done")
    }

    #[test]
    fn request_defaults_correlation_id_when_absent() {
        let env = EnvelopeBuilder::new("calc.add.requested", Topic::ActionRequests, "t1")
            .data(json!({}))
            .request("calc.add.done");
        assert!(env.correlation_id.is_some());
        assert_eq!(env.response_event.as_deref(), Some("calc.add.done"));
    }

    #[test]
    fn request_keeps_explicit_correlation_id() {
        let env = sample_request();
        assert_eq!(env.correlation_id.as_deref(), Some("c-1"));
    }

    #[test]
    fn announce_rejects_action_results_topic() {
        let err = EnvelopeBuilder::new("calc.add.done", Topic::ActionResults, "t1")
            .data(json!({}))
            .announce()
            .unwrap_err();
        assert!(matches!(err, SoormaError::InvalidEnvelope(_)));
    }

    #[test]
    fn validate_rejects_missing_response_event_on_request_topic() {
        let mut env = sample_request();
        env.response_event = None;
        assert!(env.validate().is_err());
    }

    #[test]
    fn effective_correlation_id_falls_back_to_event_id() {
        let mut env = sample_request();
        env.correlation_id = None;
        assert_eq!(env.effective_correlation_id(), env.event_id.to_string());
    }
}
