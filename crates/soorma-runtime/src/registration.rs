//! Registration and heartbeat lifecycle (spec §4.3 failure model:
//! "heartbeats keep an `AgentRecord` alive; a missed window expires it and
//! the agent must re-register").

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info, warn};

use crate::entities::AgentDefinition;
use crate::error::RuntimeError;
use crate::registry::RegistryClient;

/// Register `definition` and spawn a background task that heartbeats at
/// `ttl_seconds / 3` for as long as the process runs. If a heartbeat
/// 404s — the record expired — re-register exactly once; if the very next
/// heartbeat still 404s, the loop gives up rather than re-registering
/// forever against a Registry that keeps losing this agent.
pub async fn register_and_heartbeat(registry: Arc<dyn RegistryClient>, definition: AgentDefinition) -> Result<(), RuntimeError> {
    let record = registry.register_agent(definition.clone()).await?;
    info!(agent_id = %record.agent_id, "registered with the registry");

    let ttl = record.ttl_seconds.max(3);
    let period = Duration::from_secs(ttl / 3);
    let agent_id = record.agent_id.clone();

    tokio::spawn(async move {
        let mut ticker = interval(period);
        let mut recovered_once = false;

        loop {
            ticker.tick().await;
            match registry.heartbeat(&agent_id).await {
                Ok(_) => {
                    recovered_once = false;
                }
                Err(err) if err.status_code() == Some(404) && !recovered_once => {
                    warn!(%agent_id, "heartbeat 404'd, re-registering once");
                    match registry.register_agent(definition.clone()).await {
                        Ok(fresh) => {
                            recovered_once = true;
                            info!(agent_id = %fresh.agent_id, "re-registered after expiry");
                        }
                        Err(err) => {
                            error!(%err, "re-registration failed, giving up on this agent's heartbeat loop");
                            break;
                        }
                    }
                }
                Err(err) if err.status_code() == Some(404) => {
                    error!(%agent_id, "heartbeat 404'd again immediately after re-registration, giving up");
                    break;
                }
                Err(err) => {
                    warn!(%err, "heartbeat failed, will retry next tick");
                }
            }
        }
    });

    Ok(())
}
