//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::blob::CircuitState;
use crate::models::ImageStatus;
use crate::pipeline::PipelineEvent;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" while the blob store circuit is not closed
    pub status: String,
    pub module: String,
    pub version: String,
    /// Short commit hash captured at build time
    pub git_hash: String,
    pub build_profile: String,
    pub uptime_seconds: u64,
    pub blob_store_circuit: CircuitState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;
    let last_error = state.last_error.read().await.clone();
    let circuit = state.breaker.state();

    let status = match circuit {
        CircuitState::Closed => "ok",
        CircuitState::Open | CircuitState::HalfOpen => "degraded",
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: "gpc-ml".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
        uptime_seconds,
        blob_store_circuit: circuit,
        last_error,
    })
}

/// Record the reason of every unit that ends `failed` as the last error
pub fn track_last_error(state: &AppState) -> JoinHandle<()> {
    let mut events = state.orchestrator.subscribe();
    let last_error = state.last_error.clone();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PipelineEvent::UnitFinished {
                    image_unit_id,
                    status: ImageStatus::Failed,
                    failure_reason,
                    ..
                }) => {
                    let reason = failure_reason.unwrap_or_else(|| "unknown".to_string());
                    *last_error.write().await =
                        Some(format!("Image unit {}: {}", image_unit_id, reason));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Error tracker lagged behind pipeline events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
