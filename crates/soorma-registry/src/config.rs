//! Registry service configuration — same TOML + env-override shape as
//! `soorma-bus`'s `BusConfig`.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Registry service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// `dev` (header auth) or `prod` (JWT auth).
    #[serde(default = "default_profile")]
    pub auth_profile: String,
    /// HMAC secret used when `auth_profile = "prod"`.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Backend selector: `memory` or `sqlite`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Path to the SQLite database file when `backend = "sqlite"`.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// HTTP bind address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Grace window (seconds) an `expired` record survives before the
    /// TTL sweeper deletes it.
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: i64,
    /// Event Bus base URL, used to announce `agent-lifecycle` events.
    #[serde(default = "default_bus_url")]
    pub bus_url: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            auth_profile: default_profile(),
            jwt_secret: None,
            backend: default_backend(),
            db_path: default_db_path(),
            bind_addr: default_bind_addr(),
            grace_seconds: default_grace_seconds(),
            bus_url: default_bus_url(),
        }
    }
}

fn default_profile() -> String {
    "dev".to_string()
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_db_path() -> String {
    "data/registry.db".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8082".to_string()
}

fn default_grace_seconds() -> i64 {
    300
}

fn default_bus_url() -> String {
    "http://localhost:8081".to_string()
}

/// Load configuration from `path`, falling back to defaults, then
/// applying environment overrides prefixed `SOORMA_REGISTRY_`.
pub fn load_config(path: &str) -> anyhow::Result<RegistryConfig> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(config::Environment::with_prefix("SOORMA_REGISTRY").separator("_"));
    let settings = builder.build()?;
    Ok(settings.try_deserialize().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_dev_profile_and_memory_backend() {
        let config = RegistryConfig::default();
        assert_eq!(config.auth_profile, "dev");
        assert_eq!(config.backend, "memory");
        assert_eq!(config.grace_seconds, 300);
    }
}
