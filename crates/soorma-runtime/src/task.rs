//! [`TaskContext`] — the per-request handle a handler owns from the
//! moment it accepts an `action-requests` envelope until it calls
//! `complete()` (spec §4.5).

use std::collections::HashMap;

use serde_json::{Map, Value};
use soorma_envelope::{router, Envelope};
use uuid::Uuid;

use crate::context::PlatformContext;
use crate::entities::TaskContext as TaskContextRecord;
use crate::error::RuntimeError;

/// One sub-task handed off via [`TaskContext::delegate`] or
/// [`TaskContext::delegate_parallel`].
#[derive(Debug, Clone)]
pub struct DelegationSpec {
    pub event_type: String,
    pub data: Value,
    pub response_event: String,
    /// Key this result is stored under in the parallel-group result map.
    pub label: String,
}

/// A durable handle to one in-flight request (spec §4.5 "TaskContext
/// lifecycle"). Backed by a [`TaskContextRecord`] persisted in Memory so a
/// crashed worker can be resumed by another instance via [`TaskContext::restore`].
pub struct TaskContext {
    platform: PlatformContext,
    request: Envelope,
    record: TaskContextRecord,
}

impl TaskContext {
    /// Begin tracking `request`, persisting the initial record immediately
    /// (spec §4.5: "MUST be saved before any sub-task is delegated").
    pub async fn start(
        platform: PlatformContext,
        agent_id: impl Into<String>,
        request: Envelope,
        plan_id: Option<Uuid>,
    ) -> Result<Self, RuntimeError> {
        let task_id = Uuid::new_v4().to_string();
        let record = TaskContextRecord {
            tenant_id: request.tenant_id.clone(),
            user_id: request.user_id.clone().unwrap_or_default(),
            agent_id: agent_id.into(),
            task_id: task_id.clone(),
            plan_id,
            event_type: request.event_type.clone(),
            data: request.data.clone(),
            response_event: request.response_event.clone(),
            response_topic: request.response_topic.map(|t| t.as_str().to_string()),
            sub_tasks: Map::new(),
            state: Map::new(),
        };
        platform.memory.save_task_context(record.clone()).await?;
        Ok(Self { platform, request, record })
    }

    /// Resume a previously-saved task by id (spec §4.5 crash recovery:
    /// "another instance MAY resume it by task_id").
    pub async fn restore(platform: PlatformContext, request: Envelope, task_id: &str) -> Result<Option<Self>, RuntimeError> {
        let record = platform.memory.get_task_context(task_id).await?;
        Ok(record.map(|record| Self { platform, request, record }))
    }

    /// This task's durable id.
    pub fn task_id(&self) -> &str {
        &self.record.task_id
    }

    /// The scratch state accumulated so far.
    pub fn state(&self) -> &Map<String, Value> {
        &self.record.state
    }

    /// Merge `patch` into this task's scratch state and persist it.
    pub async fn update_state(&mut self, patch: Map<String, Value>) -> Result<(), RuntimeError> {
        for (key, value) in patch {
            self.record.state.insert(key, value);
        }
        let patch_body = serde_json::json!({ "state": self.record.state });
        self.platform.memory.update_task_context(&self.record.task_id, patch_body).await?;
        Ok(())
    }

    /// Delegate one sub-task. The correlation id is recorded in
    /// `sub_tasks` *before* the request is published (spec §4.6 invariant
    /// 4), so a response that races the save can never be orphaned.
    pub async fn delegate(
        &mut self,
        event_type: impl Into<String>,
        data: Value,
        response_event: impl Into<String>,
        label: impl Into<String>,
    ) -> Result<String, RuntimeError> {
        let correlation_id = Uuid::new_v4().to_string();
        let child = router::create_child_request_with_correlation(
            &self.request,
            event_type,
            data,
            response_event,
            correlation_id.clone(),
        );

        self.record
            .sub_tasks
            .insert(label.into(), Value::String(correlation_id.clone()));
        let patch = serde_json::json!({ "sub_tasks": self.record.sub_tasks });
        self.platform.memory.update_task_context(&self.record.task_id, patch).await?;

        self.platform.bus.publish(child).await?;
        Ok(correlation_id)
    }

    /// Delegate several sub-tasks as one parallel-wait group (spec §4.5
    /// "fan-out/fan-in"). Every correlation id is recorded under the
    /// returned `group_id` before any envelope is published.
    pub async fn delegate_parallel(&mut self, specs: Vec<DelegationSpec>) -> Result<String, RuntimeError> {
        let group_id = Uuid::new_v4().to_string();
        let mut group = Map::new();
        let mut children = Vec::with_capacity(specs.len());

        for spec in &specs {
            let correlation_id = Uuid::new_v4().to_string();
            let child = router::create_child_request_with_correlation(
                &self.request,
                spec.event_type.clone(),
                spec.data.clone(),
                spec.response_event.clone(),
                correlation_id.clone(),
            );
            group.insert(spec.label.clone(), Value::String(correlation_id));
            children.push(child);
        }

        self.record.sub_tasks.insert(group_id.clone(), Value::Object(group));
        let patch = serde_json::json!({ "sub_tasks": self.record.sub_tasks });
        self.platform.memory.update_task_context(&self.record.task_id, patch).await?;

        for child in children {
            self.platform.bus.publish(child).await?;
        }
        Ok(group_id)
    }

    /// Record one member of a parallel-wait group's result and return the
    /// full map once every member has reported (spec §4.5 "fan-in"),
    /// `None` while members are still outstanding.
    pub async fn aggregate_parallel_results(
        &mut self,
        group_id: &str,
        label: &str,
        result: Value,
    ) -> Result<Option<HashMap<String, Value>>, RuntimeError> {
        let expected = match self.record.sub_tasks.get(group_id) {
            Some(Value::Object(map)) => map.clone(),
            _ => {
                return Err(RuntimeError::Internal(format!(
                    "no parallel-delegation group {group_id} recorded on task {}",
                    self.record.task_id
                )))
            }
        };

        let results_key = format!("_results.{group_id}");
        let mut collected = match self.record.state.get(&results_key) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        collected.insert(label.to_string(), result);
        self.record.state.insert(results_key.clone(), Value::Object(collected.clone()));

        let patch = serde_json::json!({ "state": self.record.state });
        self.platform.memory.update_task_context(&self.record.task_id, patch).await?;

        if expected.keys().all(|label| collected.contains_key(label)) {
            Ok(Some(collected.into_iter().collect()))
        } else {
            Ok(None)
        }
    }

    /// Publish the final response and release the durable record (spec
    /// §4.5: "on completion the worker MUST publish its response before
    /// deleting its TaskContext").
    pub async fn complete(self, result: Value) -> Result<(), RuntimeError> {
        let response = router::respond(&self.request, result)?;
        self.platform.bus.publish(response).await?;
        self.platform.memory.delete_task_context(&self.record.task_id).await?;
        Ok(())
    }
}
