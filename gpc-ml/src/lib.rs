//! gpc-ml library interface
//!
//! The greenhouse plant counting core: container segmentation, routed plant
//! detection, band estimation of missed plants, and the fan-out/fan-in
//! pipeline that turns one photo into one counted image unit.

pub mod api;
pub mod blob;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod scoring;
pub mod utils;
pub mod vision;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::blob::CircuitBreaker;
use crate::pipeline::PipelineOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub orchestrator: Arc<PipelineOrchestrator>,
    /// Breaker guarding the blob store (read-only here)
    pub breaker: Arc<CircuitBreaker>,
    pub startup_time: DateTime<Utc>,
    /// Last fatal pipeline error, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, orchestrator: Arc<PipelineOrchestrator>) -> Self {
        let breaker = Arc::clone(orchestrator.blob_store().breaker());
        Self {
            db,
            orchestrator,
            breaker,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::image_routes())
        .merge(api::parameter_routes())
        .merge(api::circuit_routes())
        .merge(api::calibration_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
