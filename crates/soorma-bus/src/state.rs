//! Shared application state for the Event Bus service's axum router.

use std::sync::Arc;

use soorma_auth::AuthProfile;
use soorma_backbone::Backbone;

use crate::dispatch::Dispatcher;

/// State cloned into every axum handler.
#[derive(Clone)]
pub struct AppState {
    /// The durable topic log.
    pub backbone: Arc<dyn Backbone>,
    /// Queue-group routing and redelivery tracking.
    pub dispatcher: Arc<Dispatcher>,
    /// Active authentication profile.
    pub auth_profile: AuthProfile,
}

impl AppState {
    /// Build application state over `backbone`.
    pub fn new(backbone: Arc<dyn Backbone>, auth_profile: AuthProfile) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(backbone.clone()));
        Self { backbone, dispatcher, auth_profile }
    }

    /// Spawn the background redelivery/retention sweep loop. Runs for the
    /// lifetime of the process.
    pub fn spawn_background_sweeps(&self) {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
            loop {
                interval.tick().await;
                if let Err(err) = dispatcher.sweep_pending_acks().await {
                    tracing::warn!(%err, "redelivery sweep failed");
                }
            }
        });

        let backbone = self.backbone.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                interval.tick().await;
                match backbone.sweep_retention().await {
                    Ok(dropped) if dropped > 0 => tracing::info!(dropped, "retention sweep dropped envelopes"),
                    Ok(_) => {}
                    Err(err) => tracing::warn!(%err, "retention sweep failed"),
                }
            }
        });
    }
}
