#![forbid(unsafe_code)]

//! **soorma-registry** – Registry service binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use soorma_auth::AuthProfile;
use soorma_backbone::{Backbone, InMemoryBackbone, SqliteBackbone};
use soorma_registry::config::load_config;
use soorma_registry::memory::InMemoryStore;
use soorma_registry::sqlite::SqliteStore;
use soorma_registry::{router, AppState, Store};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "soorma-registry")]
#[command(about = "Soorma Core Registry — agent, event, and schema catalog")]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML).
    #[arg(long, default_value = "config/registry.toml")]
    config: String,

    /// Storage backend override (`memory` or `sqlite`).
    #[arg(long)]
    backend: Option<String>,

    /// SQLite database path override.
    #[arg(long)]
    db_path: Option<String>,

    /// HTTP bind address override.
    #[arg(long)]
    bind_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    info!("Starting Soorma Registry v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(&cli.config).with_context(|| format!("failed to load config from {}", cli.config))?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }

    let store: Arc<dyn Store> = match config.backend.as_str() {
        "sqlite" => Arc::new(SqliteStore::open(&config.db_path).await.context("opening sqlite registry store")?),
        "memory" => Arc::new(InMemoryStore::new()),
        other => anyhow::bail!("unknown backend {other:?}, expected \"memory\" or \"sqlite\""),
    };

    // The registry announces agent-lifecycle events over the same
    // message-backbone abstraction the Event Bus service uses; in a
    // real deployment this points at the shared durable backbone rather
    // than a process-local one.
    let backbone: Arc<dyn Backbone> = match config.backend.as_str() {
        "sqlite" => Arc::new(SqliteBackbone::open(&config.db_path).await.context("opening sqlite backbone")?),
        _ => Arc::new(InMemoryBackbone::default()),
    };

    let auth_profile = match config.auth_profile.as_str() {
        "prod" => {
            let secret = config.jwt_secret.clone().context("prod auth profile requires jwt_secret")?;
            AuthProfile::Prod(soorma_auth::JwtValidator::new(secret))
        }
        _ => AuthProfile::Dev,
    };

    let state = AppState::new(store, backbone, auth_profile, config.grace_seconds);
    state.spawn_ttl_sweep();

    let app = router(state);
    let addr: SocketAddr = config.bind_addr.parse().context("invalid bind_addr")?;
    info!(%addr, backend = %config.backend, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("failed to initialize logging")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
