#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **soorma-types** – Shared primitive data structures for Soorma Core.
//!
//! This crate sits at the bottom of the crate graph: the fixed topic set,
//! tenant/user identifiers, and the workspace-wide error taxonomy. It is
//! dependency-light and makes no assumptions about transport or storage so
//! that every other crate in the workspace can depend on it without cycles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant identifier. Mandatory on every envelope and every memory row.
pub type TenantId = String;

/// End-user or agent identity. Optional on envelopes, mandatory for
/// user-scoped memory kinds.
pub type UserId = String;

/// Groups related plans under one organizational container.
pub type SessionId = String;

//─────────────────────────────
//  Fixed topic set
//─────────────────────────────

/// The eight fixed routing channels. A topic is never inferred from
/// `event_type`; producers and consumers name it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    /// Task/invocation requests expecting responses.
    ActionRequests,
    /// Correlated responses to requests.
    ActionResults,
    /// Domain events, fire-and-forget.
    BusinessFacts,
    /// Internal lifecycle notifications (progress, waiting, failures).
    SystemEvents,
    /// Human-in-the-loop prompts and updates.
    Notifications,
    /// Register/deregister/expire notifications.
    AgentLifecycle,
    /// Immutable audit trail duplication.
    Audit,
    /// Undeliverable envelopes.
    DeadLetter,
}

impl Topic {
    /// All eight fixed topics, in the order they appear in the spec.
    pub const ALL: [Topic; 8] = [
        Topic::ActionRequests,
        Topic::ActionResults,
        Topic::BusinessFacts,
        Topic::SystemEvents,
        Topic::Notifications,
        Topic::AgentLifecycle,
        Topic::Audit,
        Topic::DeadLetter,
    ];

    /// The wire name used in HTTP query params, SSE `event:` framing, and
    /// storage keys (e.g. `action-requests`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ActionRequests => "action-requests",
            Topic::ActionResults => "action-results",
            Topic::BusinessFacts => "business-facts",
            Topic::SystemEvents => "system-events",
            Topic::Notifications => "notifications",
            Topic::AgentLifecycle => "agent-lifecycle",
            Topic::Audit => "audit",
            Topic::DeadLetter => "dead-letter",
        }
    }

    /// Parse a topic from its wire name. Returns `None` for any value
    /// outside the fixed set — callers must reject, never coerce.
    pub fn parse(raw: &str) -> Option<Topic> {
        Topic::ALL.into_iter().find(|t| t.as_str() == raw)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default response topic when a request doesn't name one explicitly.
pub const DEFAULT_RESPONSE_TOPIC: Topic = Topic::ActionResults;

//─────────────────────────────
//  Error taxonomy (§7)
//─────────────────────────────

/// Workspace-wide error taxonomy. Every service crate maps its internal
/// failures onto one of these variants so that HTTP status codes and
/// propagation policy stay uniform across the Event Bus, Registry, and
/// Memory services.
#[derive(Debug, thiserror::Error)]
pub enum SoormaError {
    /// Missing/invalid envelope fields. Not retried.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Topic not in the fixed set. Not retried.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// Missing tenant/user context.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Cross-tenant or cross-user access attempt.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Absent record, including heartbeat of an unknown agent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Upsert constraint violation that isn't an intended conflict.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Underlying transport is down; caller retries with backoff.
    #[error("backbone unavailable: {0}")]
    BackboneUnavailable(String),

    /// Deadline exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Agent handler raised an error during dispatch.
    #[error("handler error: {0}")]
    HandlerError(String),

    /// Catch-all for unexpected internal failures (storage I/O, codec
    /// errors, etc.) that don't map onto a more specific variant above.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SoormaError {
    /// The HTTP status this error maps to, per spec §7.
    pub fn status_code(&self) -> u16 {
        match self {
            SoormaError::InvalidEnvelope(_) => 400,
            SoormaError::UnknownTopic(_) => 400,
            SoormaError::Unauthenticated(_) => 401,
            SoormaError::Forbidden(_) => 403,
            SoormaError::NotFound(_) => 404,
            SoormaError::Conflict(_) => 409,
            SoormaError::BackboneUnavailable(_) => 503,
            SoormaError::Timeout(_) => 504,
            SoormaError::HandlerError(_) => 500,
            SoormaError::Internal(_) => 500,
        }
    }

    /// Whether a caller should retry this error with backoff.
    pub fn retryable(&self) -> bool {
        matches!(self, SoormaError::BackboneUnavailable(_) | SoormaError::Timeout(_))
    }
}

/// Machine-readable error body returned by every service's HTTP surface.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Short, stable error kind (e.g. `"not_found"`).
    pub error: String,
    /// Human-readable detail.
    pub message: String,
}

impl From<&SoormaError> for ErrorBody {
    fn from(err: &SoormaError) -> Self {
        let kind = match err {
            SoormaError::InvalidEnvelope(_) => "invalid_envelope",
            SoormaError::UnknownTopic(_) => "unknown_topic",
            SoormaError::Unauthenticated(_) => "unauthenticated",
            SoormaError::Forbidden(_) => "forbidden",
            SoormaError::NotFound(_) => "not_found",
            SoormaError::Conflict(_) => "conflict",
            SoormaError::BackboneUnavailable(_) => "backbone_unavailable",
            SoormaError::Timeout(_) => "timeout",
            SoormaError::HandlerError(_) => "handler_error",
            SoormaError::Internal(_) => "internal",
        };
        ErrorBody {
            error: kind.to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for SoormaError {
    fn into_response(self) -> axum::response::Response {
        let status = axum::http::StatusCode::from_u16(self.status_code())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody::from(&self);
        (status, axum::Json(body)).into_response()
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SoormaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_round_trips_through_wire_name() {
        for topic in Topic::ALL {
            let parsed = Topic::parse(topic.as_str()).expect("fixed topic parses");
            assert_eq!(parsed, topic);
        }
    }

    #[test]
    fn unknown_topic_rejected() {
        assert!(Topic::parse("made-up-topic").is_none());
    }

    #[test]
    fn error_status_codes_match_taxonomy() {
        assert_eq!(SoormaError::NotFound("x".into()).status_code(), 404);
        assert_eq!(SoormaError::Forbidden("x".into()).status_code(), 403);
        assert_eq!(SoormaError::BackboneUnavailable("x".into()).status_code(), 503);
        assert!(SoormaError::BackboneUnavailable("x".into()).retryable());
        assert!(!SoormaError::InvalidEnvelope("x".into()).retryable());
    }
}
