//! gpc-ml - greenhouse plant counting service
//!
//! Loads configuration, opens the database, initializes the scoring backend
//! pools and serves the status surface while image units are processed in
//! the background.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gpc_common::config::{load_toml_config, resolve_config_path};
use gpc_ml::blob::{
    CircuitBreaker, CircuitBreakerConfig, HttpBlobTransport, ResilientBlobStore, RetryPolicy,
};
use gpc_ml::config::ServiceConfig;
use gpc_ml::pipeline::PipelineOrchestrator;
use gpc_ml::scoring::{HttpScoringBackend, ModelPool, ScoringBackend};
use gpc_ml::AppState;

/// Command-line arguments for gpc-ml
#[derive(Parser, Debug)]
#[command(name = "gpc-ml")]
#[command(about = "Greenhouse plant counting service")]
#[command(version)]
struct Args {
    /// Path to gpc-ml.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind address (host:port)
    #[arg(short, long, env = "GPC_BIND_ADDRESS")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), "GPC_CONFIG", "gpc-ml");
    let mut toml = load_toml_config(&config_path)?;
    toml.apply_env_overrides();
    if let Some(bind) = args.bind {
        toml.bind_address = Some(bind);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        build_profile = env!("BUILD_PROFILE"),
        built = env!("BUILD_TIMESTAMP"),
        "Starting gpc-ml"
    );
    info!("Config file: {}", config_path.display());

    let config = ServiceConfig::resolve(&toml)?;

    let db = gpc_ml::db::init_database_pool(&config.database_path)
        .await
        .context("Failed to open database")?;
    info!("Database: {}", config.database_path.display());

    // Breaker and blob retry settings are fixed for the life of the process
    let params = gpc_ml::db::parameters::load_pipeline_parameters(&db).await?;
    let breaker = Arc::new(CircuitBreaker::new(
        "blob_store",
        CircuitBreakerConfig {
            failure_threshold: params.circuit_breaker.failure_threshold,
            cool_down: Duration::from_secs(params.circuit_breaker.cool_down_secs),
        },
    ));
    let transport = Arc::new(HttpBlobTransport::new(&config.blob_store_url, config.blob_timeout)?);
    let blob_store = Arc::new(ResilientBlobStore::new(
        transport,
        breaker,
        RetryPolicy::from_parameters(&params.retry),
    ));

    let segmenter_pool = load_pool("segmenter", &config.segmenter_url, &config).await?;
    let detector_pool = load_pool("detector", &config.detector_url, &config).await?;
    info!(slots = config.model_slots, "Scoring backends initialized");

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        db.clone(),
        blob_store,
        segmenter_pool,
        detector_pool,
    ));

    let interrupted = orchestrator.recover_interrupted().await?;
    if interrupted > 0 {
        info!(interrupted, "Recovered units interrupted by a previous run");
    }

    let state = AppState::new(db, orchestrator);
    gpc_ml::api::track_last_error(&state);
    let app = gpc_ml::build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", config.bind_address);
    info!("Health check: http://{}/health", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// One initialized backend per worker slot
async fn load_pool(
    name: &str,
    endpoint: &str,
    config: &ServiceConfig,
) -> Result<ModelPool<dyn ScoringBackend>> {
    let pool = ModelPool::initialize(config.model_slots, |slot| {
        let name = format!("{}-{}", name, slot);
        async move {
            let backend = HttpScoringBackend::load(&name, endpoint, config.scoring_timeout).await?;
            Ok::<Arc<dyn ScoringBackend>, gpc_ml::scoring::ScoringError>(Arc::new(backend))
        }
    })
    .await
    .with_context(|| format!("Failed to initialize {} backend at {}", name, endpoint))?;
    Ok(pool)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
