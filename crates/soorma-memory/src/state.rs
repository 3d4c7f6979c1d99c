//! Shared application state for the Memory service's axum router.

use std::sync::Arc;

use soorma_auth::AuthProfile;

use crate::embedding::EmbeddingProvider;
use crate::store::MemoryStore;

/// State cloned into every axum handler.
#[derive(Clone)]
pub struct AppState {
    /// The active storage backend.
    pub store: Arc<dyn MemoryStore>,
    /// The active embedding provider.
    pub embeddings: Arc<dyn EmbeddingProvider>,
    /// Active authentication profile.
    pub auth_profile: AuthProfile,
    /// `top_k` applied when a search request doesn't specify one.
    pub default_top_k: usize,
}

impl AppState {
    /// Build application state.
    pub fn new(
        store: Arc<dyn MemoryStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        auth_profile: AuthProfile,
        default_top_k: usize,
    ) -> Self {
        Self { store, embeddings, auth_profile, default_top_k }
    }
}
