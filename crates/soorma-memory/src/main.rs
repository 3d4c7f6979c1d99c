#![forbid(unsafe_code)]

//! **soorma-memory** – Memory service binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use soorma_auth::AuthProfile;
use soorma_memory::config::load_config;
use soorma_memory::embedding::{EmbeddingProvider, HashEmbeddingProvider};
use soorma_memory::memory::InMemoryStore;
use soorma_memory::postgres::PostgresStore;
use soorma_memory::{router, AppState, MemoryStore};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "soorma-memory")]
#[command(about = "Soorma Core Memory — semantic, episodic, procedural, and working memory plus plan/task state")]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML).
    #[arg(long, default_value = "config/memory.toml")]
    config: String,

    /// Storage backend override (`memory` or `postgres`).
    #[arg(long)]
    backend: Option<String>,

    /// Postgres connection string override.
    #[arg(long)]
    database_url: Option<String>,

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

    info!("Starting Soorma Memory v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(&cli.config).with_context(|| format!("failed to load config from {}", cli.config))?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }

    let store: Arc<dyn MemoryStore> = match config.backend.as_str() {
        "postgres" => Arc::new(PostgresStore::connect(&config.database_url).await.context("connecting to postgres")?),
        "memory" => Arc::new(InMemoryStore::default()),
        other => anyhow::bail!("unknown backend {other:?}, expected \"memory\" or \"postgres\""),
    };

    let embeddings: Arc<dyn EmbeddingProvider> = match config.embedding_provider.as_str() {
        "hash" => Arc::new(HashEmbeddingProvider::default()),
        other => anyhow::bail!(
            "unknown embedding provider {other:?}; only \"hash\" ships without the http-embeddings feature"
        ),
    };

    let auth_profile = match config.auth_profile.as_str() {
        "prod" => {
            let secret = config.jwt_secret.clone().context("prod auth profile requires jwt_secret")?;
            AuthProfile::Prod(soorma_auth::JwtValidator::new(secret))
        }
        _ => AuthProfile::Dev,
    };

    let state = AppState::new(store, embeddings, auth_profile, config.default_top_k);

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
