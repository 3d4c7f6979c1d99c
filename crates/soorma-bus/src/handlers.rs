//! HTTP surface for the Event Bus service (spec §6.2).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use soorma_auth::extract_caller;
use soorma_envelope::Envelope;
use soorma_types::{SoormaError, Topic};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::dispatch::SubscribeFilter;
use crate::state::AppState;

/// Body accepted by `POST /v1/events`. Mirrors [`Envelope`] but leaves
/// system-assigned fields optional — the service fills them in.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    event_id: Option<Uuid>,
    event_type: String,
    topic: String,
    tenant_id: String,
    user_id: Option<String>,
    session_id: Option<String>,
    correlation_id: Option<String>,
    parent_event_id: Option<Uuid>,
    trace_id: Option<Uuid>,
    response_event: Option<String>,
    response_topic: Option<String>,
    payload_schema_name: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
    occurred_at: Option<DateTime<Utc>>,
    assigned_to: Option<String>,
}

impl PublishRequest {
    fn into_envelope(self) -> Result<Envelope, SoormaError> {
        let topic = Topic::parse(&self.topic).ok_or_else(|| SoormaError::UnknownTopic(self.topic.clone()))?;
        let response_topic = match self.response_topic {
            Some(raw) => Some(Topic::parse(&raw).ok_or_else(|| SoormaError::UnknownTopic(raw))?),
            None => None,
        };
        let event_id = self.event_id.unwrap_or_else(Uuid::new_v4);
        Ok(Envelope {
            event_id,
            event_type: self.event_type,
            topic,
            tenant_id: self.tenant_id,
            user_id: self.user_id,
            session_id: self.session_id,
            correlation_id: self.correlation_id,
            parent_event_id: self.parent_event_id,
            trace_id: Some(self.trace_id.unwrap_or(event_id)),
            response_event: self.response_event,
            response_topic,
            payload_schema_name: self.payload_schema_name,
            data: self.data,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
            assigned_to: self.assigned_to,
        })
    }
}

/// `POST /v1/events` — publish an envelope.
///
/// Validates against spec §3.1, assigns `event_id`/`occurred_at` if
/// absent, rejects unknown topics and tenant mismatches, persists to the
/// backbone, and fans it out to any registered queue groups.
pub async fn publish(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PublishRequest>,
) -> Result<impl IntoResponse, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    let envelope = request.into_envelope()?;

    if envelope.tenant_id != caller.tenant_id {
        return Err(SoormaError::Forbidden(format!(
            "cannot publish for tenant {:?} as tenant {:?}",
            envelope.tenant_id, caller.tenant_id
        )));
    }

    envelope.validate()?;

    state.backbone.commit(&envelope).await?;
    state.dispatcher.dispatch_envelope(&envelope).await;

    Ok((StatusCode::CREATED, Json(envelope)))
}

/// Query parameters accepted by `GET /v1/events/stream`.
#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    topic: String,
    event_type: Option<String>,
    queue_group: Option<String>,
    tenant_id: String,
    assigned_to: Option<String>,
}

/// `GET /v1/events/stream` — long-lived SSE subscription.
///
/// Refuses any `tenant_id` other than the caller's own (spec §4.2). When
/// `queue_group` is set, this connection competes with other members of
/// the same group for each envelope (spec §4.2 routing rules); otherwise
/// it receives every matching envelope (pure broadcast).
pub async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SubscribeQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, SoormaError> {
    let caller = extract_caller(&headers, &state.auth_profile)?;
    if query.tenant_id != caller.tenant_id {
        return Err(SoormaError::Forbidden(format!(
            "cannot subscribe for tenant {:?} as tenant {:?}",
            query.tenant_id, caller.tenant_id
        )));
    }

    let topic = Topic::parse(&query.topic).ok_or_else(|| SoormaError::UnknownTopic(query.topic.clone()))?;
    let filter = SubscribeFilter {
        topic,
        event_type_prefix: query.event_type.clone(),
        tenant_id: caller.tenant_id.clone(),
        assigned_to: query.assigned_to.clone(),
        queue_group: query.queue_group.clone(),
    };

    let replay = replay_from_last_event_id(&state, &headers, topic).await?;

    let live: std::pin::Pin<Box<dyn Stream<Item = Envelope> + Send>> = if let Some(group) = &filter.queue_group {
        let (_member_id, rx) = state.dispatcher.join_group(topic, group, filter.assigned_to.clone());
        Box::pin(ReceiverStream::new(rx))
    } else {
        let rx = state.backbone.tail(topic);
        Box::pin(tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(|r| async { r.ok() }))
    };

    let filtered = stream::iter(replay)
        .chain(live)
        .filter(move |envelope| {
            let keep = filter.matches(envelope);
            async move { keep }
        })
        .map(envelope_to_sse_event);

    Ok(Sse::new(filtered).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn envelope_to_sse_event(envelope: Envelope) -> Result<SseEvent, Infallible> {
    let data = serde_json::to_string(&envelope).unwrap_or_else(|_| "null".to_string());
    Ok(SseEvent::default()
        .event(envelope.event_type.clone())
        .id(envelope.event_id.to_string())
        .data(data))
}

async fn replay_from_last_event_id(
    state: &AppState,
    headers: &HeaderMap,
    topic: Topic,
) -> Result<Vec<Envelope>, SoormaError> {
    let Some(last_id) = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
    else {
        return Ok(Vec::new());
    };

    let Some(last) = state.backbone.get(topic, last_id).await? else {
        return Ok(Vec::new());
    };

    let mut replayed = state.backbone.replay_since(topic, last.occurred_at, 1000).await?;
    replayed.retain(|e| e.event_id != last_id);
    Ok(replayed)
}

/// Body accepted by `POST /v1/events/ack`.
#[derive(Debug, Deserialize)]
pub struct AckRequest {
    /// Unused for routing today (acks are tracked globally by
    /// `event_id`), kept so clients can correlate acks with the
    /// subscription that received the envelope.
    #[allow(dead_code)]
    subscription_id: Option<String>,
    event_id: Uuid,
}

/// `POST /v1/events/ack` — acknowledge in-flight delivery for a
/// queue-group consumer.
pub async fn ack(State(state): State<AppState>, Json(request): Json<AckRequest>) -> StatusCode {
    state.dispatcher.ack(request.event_id);
    StatusCode::NO_CONTENT
}

/// Liveness/readiness probe.
pub async fn health() -> impl IntoResponse {
    #[derive(Serialize)]
    struct Health {
        status: &'static str,
    }
    Json(Health { status: "ok" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_request_rejects_unknown_topic() {
        let request = PublishRequest {
            event_id: None,
            event_type: "order.process.requested".into(),
            topic: "not-a-topic".into(),
            tenant_id: "t1".into(),
            user_id: None,
            session_id: None,
            correlation_id: None,
            parent_event_id: None,
            trace_id: None,
            response_event: None,
            response_topic: None,
            payload_schema_name: None,
            data: serde_json::json!({}),
            occurred_at: None,
            assigned_to: None,
        };
        assert!(matches!(request.into_envelope(), Err(SoormaError::UnknownTopic(_))));
    }

    #[test]
    fn publish_request_defaults_trace_id_to_event_id() {
        let request = PublishRequest {
            event_id: None,
            event_type: "order.process.requested".into(),
            topic: "business-facts".into(),
            tenant_id: "t1".into(),
            user_id: None,
            session_id: None,
            correlation_id: None,
            parent_event_id: None,
            trace_id: None,
            response_event: None,
            response_topic: None,
            payload_schema_name: None,
            data: serde_json::json!({}),
            occurred_at: None,
            assigned_to: None,
        };
        let envelope = request.into_envelope().unwrap();
        assert_eq!(envelope.trace_id, Some(envelope.event_id));
    }
}
