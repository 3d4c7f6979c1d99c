//! Bus service configuration, loaded the way `toka-orchestration-service`
//! loads its agent configuration: a TOML file via the `config` crate,
//! overridable by environment variables, with `.env` providing secrets.

use serde::{Deserialize, Serialize};
use soorma_types::Topic;

/// Top-level configuration for the Event Bus service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
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
    /// Per-topic retention overrides, in seconds. Keys are wire topic
    /// names (e.g. `"business-facts"`).
    #[serde(default)]
    pub retention_seconds: std::collections::HashMap<String, u64>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            auth_profile: default_profile(),
            jwt_secret: None,
            backend: default_backend(),
            db_path: default_db_path(),
            bind_addr: default_bind_addr(),
            retention_seconds: std::collections::HashMap::new(),
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
    "data/bus.db".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8081".to_string()
}

/// Load configuration from `path`, falling back to defaults for anything
/// the file doesn't set, then applying environment overrides prefixed
/// `SOORMA_BUS_` (e.g. `SOORMA_BUS_BIND_ADDR`).
pub fn load_config(path: &str) -> anyhow::Result<BusConfig> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(config::Environment::with_prefix("SOORMA_BUS").separator("_"));
    let settings = builder.build()?;
    Ok(settings.try_deserialize().unwrap_or_default())
}

/// Validate that every key in `retention_seconds` names a fixed topic.
pub fn validate_retention_keys(config: &BusConfig) -> anyhow::Result<()> {
    for key in config.retention_seconds.keys() {
        if Topic::parse(key).is_none() {
            anyhow::bail!("retention_seconds names unknown topic {key:?}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_dev_profile_and_memory_backend() {
        let config = BusConfig::default();
        assert_eq!(config.auth_profile, "dev");
        assert_eq!(config.backend, "memory");
    }

    #[test]
    fn retention_keys_must_be_fixed_topics() {
        let mut config = BusConfig::default();
        config.retention_seconds.insert("not-a-topic".into(), 60);
        assert!(validate_retention_keys(&config).is_err());
    }
}
