//! Stowage server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use std::net::SocketAddr;
use std::sync::Arc;
use stowage_core::config::AppConfig;
use stowage_server::hasher::HashWorker;
use stowage_server::jobs::{Job, JobQueue};
use stowage_server::{bootstrap, create_router, jobs, tasks, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How many stranded files the startup recovery pass re-enqueues.
const RECOVERY_BATCH: u32 = 1000;

/// Stowage - resumable verified upload server
#[derive(Parser, Debug)]
#[command(name = "stowaged")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "STOWAGE_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Stowage v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file is optional, env vars can provide or
    // override everything).
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("STOWAGE_") && key != "STOWAGE_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: stowaged --config /path/to/config.toml\n  \
             2. Environment variables: STOWAGE_SERVER__BIND=0.0.0.0:8080 \
             STOWAGE_ADMIN__TOKEN_HASH=sha256:YOUR_TOKEN_HASH_HERE stowaged\n\n\
             Set STOWAGE_CONFIG to specify a default config file path."
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("STOWAGE_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    stowage_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = stowage_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;

    // Verify storage connectivity before accepting requests. Catches
    // configuration errors early instead of failing on first promotion.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("Storage backend initialized");

    let metadata = stowage_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    bootstrap::ensure_admin(metadata.as_ref(), &config.admin, &config.quota).await?;

    let hasher = Arc::new(HashWorker::spawn());
    let (queue, job_rx) = JobQueue::channel();

    let state = AppState::new(config.clone(), storage, metadata, hasher, queue);
    state
        .spool
        .init()
        .await
        .context("failed to create spool directory")?;

    let _runner = jobs::spawn_runner(state.clone(), job_rx);
    recover_pending_files(&state).await?;
    let _sweeps = tasks::spawn_sweeps(state.clone());

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Re-enqueue vetting for files a previous instance left unpromoted.
/// Vetting and promotion are idempotent, so re-running a file that was
/// mid-flight during a crash is safe.
async fn recover_pending_files(state: &AppState) -> Result<()> {
    let pending = state
        .metadata
        .list_pending_files(RECOVERY_BATCH)
        .await
        .context("failed to list pending files")?;
    if pending.is_empty() {
        return Ok(());
    }

    tracing::info!(count = pending.len(), "re-enqueueing unpromoted files");
    for file in pending {
        state.jobs.enqueue(Job::VetUpload {
            file_id: file.file_id,
        });
    }
    Ok(())
}
