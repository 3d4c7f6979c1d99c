//! Correlation-router invariants (spec §4.6 / component C7).
//!
//! These are not a process — they're the small set of pure functions every
//! component (Event Bus, Registry, Memory, Agent Runtime) must go through
//! when deriving one envelope from another, so that `trace_id` and
//! `correlation_id` stay consistent across the whole causal tree.

use crate::Envelope;
use soorma_types::SoormaError;
use uuid::Uuid;

/// Build a **respond** envelope (spec §4.1) answering `request`.
///
/// `topic` is the requester's `response_topic` (defaulting to
/// `action-results`), `event_type` is forced to `request.response_event`,
/// `correlation_id` is forced to `request`'s effective correlation id, and
/// `tenant_id`/`user_id`/`session_id` are copied from the request —
/// reusing the parent's tenant scope is required for downstream
/// authorization, not optional.
pub fn respond(request: &Envelope, data: serde_json::Value) -> Result<Envelope, SoormaError> {
    let response_event = request
        .response_event
        .clone()
        .ok_or_else(|| SoormaError::InvalidEnvelope("request has no response_event to respond to".into()))?;

    Ok(Envelope {
        event_id: Uuid::new_v4(),
        event_type: response_event,
        topic: request.effective_response_topic(),
        tenant_id: request.tenant_id.clone(),
        user_id: request.user_id.clone(),
        session_id: request.session_id.clone(),
        correlation_id: Some(request.effective_correlation_id()),
        parent_event_id: Some(request.event_id),
        trace_id: request.trace_id,
        response_event: None,
        response_topic: None,
        payload_schema_name: None,
        data,
        occurred_at: chrono::Utc::now(),
        assigned_to: None,
    })
}

/// Check that `response` satisfies the response-addressing invariant for
/// `request` (spec §8 testable property 2: correlation closure).
pub fn validate_response(request: &Envelope, response: &Envelope) -> Result<(), SoormaError> {
    let expected_event = request
        .response_event
        .as_deref()
        .ok_or_else(|| SoormaError::InvalidEnvelope("request carries no response_event".into()))?;

    if response.event_type != expected_event {
        return Err(SoormaError::InvalidEnvelope(format!(
            "response event_type {:?} does not match request.response_event {:?}",
            response.event_type, expected_event
        )));
    }

    let expected_correlation = request.effective_correlation_id();
    if response.correlation_id.as_deref() != Some(expected_correlation.as_str()) {
        return Err(SoormaError::InvalidEnvelope(format!(
            "response correlation_id {:?} does not match request correlation_id {:?}",
            response.correlation_id, expected_correlation
        )));
    }

    Ok(())
}

/// Derive a **child request** from `parent` (spec §4.1 / §4.6 invariant 2).
///
/// Copies `trace_id`, `tenant_id`, `user_id`, `session_id` from `parent`
/// and sets `parent_event_id = parent.event_id`, atomically — there is no
/// way to construct a child request that forgets one of these fields.
/// `correlation_id` is freshly minted unless the caller supplies one via
/// `with_correlation_id`, since a child request starts a new
/// request/response pair (e.g. a delegated sub-task).
pub fn create_child_request(
    parent: &Envelope,
    event_type: impl Into<String>,
    data: serde_json::Value,
    response_event: impl Into<String>,
) -> Envelope {
    create_child_request_with_correlation(parent, event_type, data, response_event, Uuid::new_v4().to_string())
}

/// As [`create_child_request`], but with an explicit `correlation_id` —
/// used when the caller needs to know the sub-task's correlation id ahead
/// of publishing, e.g. to record it in a `TaskContext.sub_tasks` map
/// before the envelope goes out (spec §4.6 invariant 4).
pub fn create_child_request_with_correlation(
    parent: &Envelope,
    event_type: impl Into<String>,
    data: serde_json::Value,
    response_event: impl Into<String>,
    correlation_id: impl Into<String>,
) -> Envelope {
    Envelope {
        event_id: Uuid::new_v4(),
        event_type: event_type.into(),
        topic: soorma_types::Topic::ActionRequests,
        tenant_id: parent.tenant_id.clone(),
        user_id: parent.user_id.clone(),
        session_id: parent.session_id.clone(),
        correlation_id: Some(correlation_id.into()),
        parent_event_id: Some(parent.event_id),
        trace_id: parent.trace_id,
        response_event: Some(response_event.into()),
        response_topic: None,
        payload_schema_name: None,
        data,
        occurred_at: chrono::Utc::now(),
        assigned_to: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EnvelopeBuilder;
    use serde_json::json;
    use soorma_types::Topic;

    fn make_request() -> Envelope {
        EnvelopeBuilder::new("calc.add.requested", Topic::ActionRequests, "t1")
            .user_id("u1")
            .correlation_id("c-1")
            .data(json!({"a": 2, "b": 3}))
            .request("calc.add.done")
    }

    #[test]
    fn respond_produces_correlated_reply() {
        let request = make_request();
        let response = respond(&request, json!({"result": 5})).unwrap();
        assert_eq!(response.event_type, "calc.add.done");
        assert_eq!(response.topic, Topic::ActionResults);
        assert_eq!(response.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(response.tenant_id, "t1");
        assert_eq!(response.user_id.as_deref(), Some("u1"));
        validate_response(&request, &response).unwrap();
    }

    #[test]
    fn validate_response_rejects_wrong_event_type() {
        let request = make_request();
        let mut response = respond(&request, json!({})).unwrap();
        response.event_type = "wrong.event".into();
        assert!(validate_response(&request, &response).is_err());
    }

    #[test]
    fn validate_response_rejects_wrong_correlation_id() {
        let request = make_request();
        let mut response = respond(&request, json!({})).unwrap();
        response.correlation_id = Some("other".into());
        assert!(validate_response(&request, &response).is_err());
    }

    #[test]
    fn child_request_propagates_trace_and_tenant() {
        let parent = make_request();
        let child = create_child_request(&parent, "inventory.reserve.requested", json!({}), "inventory.done");
        assert_eq!(child.trace_id, parent.trace_id);
        assert_eq!(child.tenant_id, parent.tenant_id);
        assert_eq!(child.user_id, parent.user_id);
        assert_eq!(child.session_id, parent.session_id);
        assert_eq!(child.parent_event_id, Some(parent.event_id));
        assert_ne!(child.correlation_id, parent.correlation_id);
    }

    #[test]
    fn child_request_with_explicit_correlation_for_subtask_tracking() {
        let parent = make_request();
        let child = create_child_request_with_correlation(
            &parent,
            "payment.process.requested",
            json!({}),
            "payment.done",
            "sub-task-42",
        );
        assert_eq!(child.correlation_id.as_deref(), Some("sub-task-42"));
    }
}
