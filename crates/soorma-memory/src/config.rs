//! Memory service configuration — same TOML + env-override shape as
//! the Event Bus and Registry services.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Memory service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// `dev` (header auth) or `prod` (JWT auth).
    #[serde(default = "default_profile")]
    pub auth_profile: String,
    /// HMAC secret used when `auth_profile = "prod"`.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Backend selector: `memory` or `postgres`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Postgres connection string when `backend = "postgres"`.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// HTTP bind address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Embedding provider selector: `hash` (deterministic, no network
    /// calls) or `http` (requires the `http-embeddings` feature).
    #[serde(default = "default_embedding_provider")]
    pub embedding_provider: String,
    /// Base URL of an HTTP embedding endpoint, used when
    /// `embedding_provider = "http"`.
    #[serde(default)]
    pub embedding_endpoint: Option<String>,
    /// Default `top_k` applied to search endpoints when the caller
    /// doesn't specify one.
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            auth_profile: default_profile(),
            jwt_secret: None,
            backend: default_backend(),
            database_url: default_database_url(),
            bind_addr: default_bind_addr(),
            embedding_provider: default_embedding_provider(),
            embedding_endpoint: None,
            default_top_k: default_top_k(),
        }
    }
}

fn default_profile() -> String {
    "dev".to_string()
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_database_url() -> String {
    "postgres://localhost/soorma_memory".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8083".to_string()
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}

fn default_top_k() -> usize {
    5
}

/// Load configuration from `path`, falling back to defaults, then
/// applying environment overrides prefixed `SOORMA_MEMORY_`.
pub fn load_config(path: &str) -> anyhow::Result<MemoryConfig> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(config::Environment::with_prefix("SOORMA_MEMORY").separator("_"));
    let settings = builder.build()?;
    Ok(settings.try_deserialize().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_dev_profile_and_memory_backend() {
        let config = MemoryConfig::default();
        assert_eq!(config.auth_profile, "dev");
        assert_eq!(config.backend, "memory");
        assert_eq!(config.embedding_provider, "hash");
        assert_eq!(config.default_top_k, 5);
    }
}
