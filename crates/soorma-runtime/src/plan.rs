//! Plan-transition filtering (spec §4.5 "Plan execution" / §9 "LLM-decided
//! plan actions" design note). A plan is a state machine whose transitions
//! are driven by `action-results` envelopes matching an outstanding
//! correlation id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use soorma_envelope::Envelope;
use soorma_types::Topic;
use uuid::Uuid;

use crate::context::PlatformContext;
use crate::entities::{PlanContext, PlanStatus};
use crate::error::RuntimeError;

/// One action an LLM-decided plan step can request (spec §9). Tagged so a
/// planner's JSON output deserializes directly into this enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanAction {
    /// Announce an event with no expected reply.
    Publish { event_type: String, topic: Topic, data: Value },
    /// Terminate the plan successfully with `results`.
    Complete { results: Value },
    /// Pause the plan until `expected_event` arrives, or `timeout_seconds`
    /// elapses.
    Wait { expected_event: String, timeout_seconds: Option<u64> },
    /// Delegate one sub-task and keep the plan running.
    Delegate { event_type: String, data: Value, response_event: String },
}

/// Reject a [`PlanAction::Publish`]/[`PlanAction::Delegate`] whose
/// `event_type` isn't registered (spec §4.3: event types are catalogued
/// before use).
pub async fn validate_action(platform: &PlatformContext, action: &PlanAction) -> Result<(), RuntimeError> {
    let event_type = match action {
        PlanAction::Publish { event_type, .. } => Some(event_type.as_str()),
        PlanAction::Delegate { event_type, .. } => Some(event_type.as_str()),
        PlanAction::Complete { .. } | PlanAction::Wait { .. } => None,
    };
    let Some(event_type) = event_type else { return Ok(()) };

    let registered = platform
        .registry
        .list_events(None)
        .await?
        .into_iter()
        .any(|definition| definition.event_name == event_type);

    if !registered {
        return Err(RuntimeError::Internal(format!("event type {event_type} is not registered")));
    }
    Ok(())
}

/// Whether `envelope` is the response a waiting `plan` is blocked on: it
/// must land on `action-results`, carry `plan.correlation_id`, and the
/// plan's current state must declare a transition for it.
pub fn matches_transition(plan: &PlanContext, envelope: &Envelope) -> bool {
    if envelope.topic != Topic::ActionResults {
        return false;
    }
    if envelope.correlation_id.as_deref() != Some(plan.correlation_id.as_str()) {
        return false;
    }
    declared_transitions(plan).contains_key(&envelope.event_type)
}

fn declared_transitions(plan: &PlanContext) -> serde_json::Map<String, Value> {
    plan.state_machine
        .get(&plan.current_state)
        .and_then(|state| state.get("transitions"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Look up the plan context addressed by `envelope.correlation_id` and
/// check whether it's waiting on this response (spec §4.6 invariant 3:
/// "a response MUST be routable back to exactly one plan via
/// correlation_id"). `Ok(None)` if no plan with that correlation id
/// exists, or if one exists but this event doesn't match its declared
/// transitions.
pub async fn resolve_transition(platform: &PlatformContext, envelope: &Envelope) -> Result<Option<PlanContext>, RuntimeError> {
    let Some(correlation_id) = envelope.correlation_id.as_deref() else {
        return Ok(None);
    };
    let plan = platform.memory.get_plan_context_by_correlation(correlation_id).await?;
    Ok(plan.filter(|plan| matches_transition(plan, envelope)))
}

/// Apply a [`PlanAction::Wait`]: pause the plan and record what it's
/// waiting for (spec §5 cancellation model).
pub async fn apply_wait(
    platform: &PlatformContext,
    plan_id: Uuid,
    expected_event: &str,
    timeout_seconds: Option<u64>,
) -> Result<PlanContext, RuntimeError> {
    let mut patch = serde_json::json!({
        "status": PlanStatus::Paused,
        "results._waiting_for": expected_event,
    });
    if let Some(timeout) = timeout_seconds {
        patch["results._wait_timeout"] = Value::from(timeout);
    }
    platform.memory.update_plan_context(plan_id, patch).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use soorma_envelope::EnvelopeBuilder;

    fn sample_plan() -> PlanContext {
        PlanContext {
            tenant_id: "t1".into(),
            user_id: "u1".into(),
            plan_id: Uuid::new_v4(),
            goal_event: "order.fulfill".into(),
            goal_data: Value::Null,
            state_machine: serde_json::json!({
                "awaiting_inventory": {
                    "transitions": { "inventory.reserve.done": "awaiting_payment" }
                }
            }),
            current_state: "awaiting_inventory".into(),
            results: Value::Null,
            status: PlanStatus::Paused,
            correlation_id: "corr-1".into(),
        }
    }

    #[test]
    fn matches_transition_requires_action_results_topic() {
        let plan = sample_plan();
        let envelope = EnvelopeBuilder::new("inventory.reserve.done", Topic::ActionRequests, "t1")
            .correlation_id("corr-1")
            .data(Value::Null)
            .announce()
            .unwrap();
        assert!(!matches_transition(&plan, &envelope));
    }

    #[test]
    fn matches_transition_requires_correlation_match() {
        let plan = sample_plan();
        let envelope = EnvelopeBuilder::new("inventory.reserve.done", Topic::ActionResults, "t1")
            .correlation_id("other")
            .data(Value::Null)
            .announce()
            .unwrap();
        assert!(!matches_transition(&plan, &envelope));
    }

    #[test]
    fn matches_transition_requires_declared_transition() {
        let plan = sample_plan();
        let envelope = EnvelopeBuilder::new("inventory.reserve.failed", Topic::ActionResults, "t1")
            .correlation_id("corr-1")
            .data(Value::Null)
            .announce()
            .unwrap();
        assert!(!matches_transition(&plan, &envelope));
    }

    #[test]
    fn matches_transition_accepts_the_declared_event() {
        let plan = sample_plan();
        let envelope = EnvelopeBuilder::new("inventory.reserve.done", Topic::ActionResults, "t1")
            .correlation_id("corr-1")
            .data(Value::Null)
            .announce()
            .unwrap();
        assert!(matches_transition(&plan, &envelope));
    }
}
