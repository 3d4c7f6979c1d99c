//! Shared application state for the Registry service's axum router.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use soorma_auth::AuthProfile;
use soorma_backbone::Backbone;
use soorma_envelope::EnvelopeBuilder;
use soorma_types::Topic;

use crate::store::Store;

/// State cloned into every axum handler.
#[derive(Clone)]
pub struct AppState {
    /// Agent/event/schema catalog.
    pub store: Arc<dyn Store>,
    /// The message backbone, used only to announce lifecycle events.
    pub backbone: Arc<dyn Backbone>,
    /// Active authentication profile.
    pub auth_profile: AuthProfile,
    /// TTL-expiry grace window before deletion.
    pub grace: Duration,
}

impl AppState {
    /// Build application state.
    pub fn new(store: Arc<dyn Store>, backbone: Arc<dyn Backbone>, auth_profile: AuthProfile, grace_seconds: i64) -> Self {
        Self { store, backbone, auth_profile, grace: Duration::seconds(grace_seconds) }
    }

    /// Announce an `agent-lifecycle` event. Failures are logged, not
    /// propagated — a lost lifecycle notification must not fail the
    /// caller's register/heartbeat/deregister request.
    pub async fn announce_lifecycle(&self, event_type: &str, tenant_id: &str, data: serde_json::Value) {
        let envelope = match EnvelopeBuilder::new(event_type, Topic::AgentLifecycle, tenant_id).data(data).announce() {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(%err, "failed to build agent-lifecycle envelope");
                return;
            }
        };
        if let Err(err) = self.backbone.commit(&envelope).await {
            tracing::warn!(%err, "failed to announce agent-lifecycle event");
        }
    }

    /// Spawn the background TTL sweep loop. Runs for the lifetime of the
    /// process, announcing `agent.expired` for every record it deletes.
    pub fn spawn_ttl_sweep(&self) {
        let state = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(StdDuration::from_secs(10));
            loop {
                interval.tick().await;
                match state.store.sweep_expired(state.grace).await {
                    Ok(expired) => {
                        for agent in expired {
                            tracing::info!(agent_id = %agent.agent_id, "agent expired and removed");
                            state
                                .announce_lifecycle(
                                    "agent.expired",
                                    &agent.tenant_scope,
                                    serde_json::json!({ "agent_id": agent.agent_id }),
                                )
                                .await;
                        }
                    }
                    Err(err) => tracing::warn!(%err, "ttl sweep failed"),
                }
            }
        });
    }
}
