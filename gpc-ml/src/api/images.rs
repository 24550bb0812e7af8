//! Image unit endpoints
//!
//! - `POST /images` create a unit for an uploaded photo and dispatch it
//! - `POST /images/:id/submit` dispatch an existing pending unit
//! - `GET /images/:id` status, counts and warnings
//! - `GET /images/:id/regions` per-region outcomes for manual follow-up
//! - `GET /images/:id/detections` persisted detections and band estimates
//! - `GET /images/:id/attempts` every attempt for the same photo
//! - `POST /images/:id/reprocess` new attempt from the same source photo

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{image_units, results};
use crate::error::{ApiError, ApiResult};
use crate::models::{BandEstimation, Detection, ImageStatus, ImageUnit};
use crate::pipeline::PipelineError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateImageRequest {
    /// Blob store key of the uploaded photo
    pub source_key: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub image_reference: String,
}

#[derive(Debug, Serialize)]
pub struct RegionsResponse {
    pub image_unit_id: Uuid,
    pub status: ImageStatus,
    pub regions: Vec<results::RegionRecord>,
}

#[derive(Debug, Serialize)]
pub struct DetectionsResponse {
    pub image_unit_id: Uuid,
    pub detections: Vec<Detection>,
    pub band_estimations: Vec<BandEstimation>,
}

#[derive(Debug, Serialize)]
pub struct AttemptsResponse {
    pub source_key: String,
    pub attempts: Vec<ImageUnit>,
}

/// POST /images
pub async fn create_image(
    State(state): State<AppState>,
    Json(request): Json<CreateImageRequest>,
) -> ApiResult<(StatusCode, Json<ImageUnit>)> {
    let source_key = request.source_key.trim();
    if source_key.is_empty() {
        return Err(ApiError::BadRequest("source_key must not be empty".to_string()));
    }

    let unit = state.orchestrator.create_and_submit(source_key).await?;
    Ok((StatusCode::ACCEPTED, Json(unit)))
}

/// POST /images/:id/submit
pub async fn submit_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<ImageUnit>)> {
    let image_reference = request.image_reference.trim();
    if image_reference.is_empty() {
        return Err(ApiError::BadRequest("image_reference must not be empty".to_string()));
    }

    let unit = load_existing(&state, id).await?;
    if unit.status != ImageStatus::Pending {
        return Err(PipelineError::AlreadyDispatched {
            id,
            status: unit.status,
        }
        .into());
    }

    state.orchestrator.submit(id, image_reference.to_string());
    Ok((StatusCode::ACCEPTED, Json(unit)))
}

/// GET /images/:id
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ImageUnit>> {
    Ok(Json(load_existing(&state, id).await?))
}

/// GET /images/:id/regions
pub async fn get_regions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RegionsResponse>> {
    let unit = load_existing(&state, id).await?;
    let regions = results::load_region_records(&state.db, id).await?;
    Ok(Json(RegionsResponse {
        image_unit_id: id,
        status: unit.status,
        regions,
    }))
}

/// GET /images/:id/detections
pub async fn get_detections(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DetectionsResponse>> {
    load_existing(&state, id).await?;
    Ok(Json(DetectionsResponse {
        image_unit_id: id,
        detections: results::load_detections(&state.db, id).await?,
        band_estimations: results::load_band_estimations(&state.db, id).await?,
    }))
}

/// GET /images/:id/attempts
pub async fn get_attempts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AttemptsResponse>> {
    let unit = load_existing(&state, id).await?;
    let attempts = image_units::list_attempts(&state.db, &unit.source_key).await?;
    Ok(Json(AttemptsResponse {
        source_key: unit.source_key,
        attempts,
    }))
}

/// POST /images/:id/reprocess
pub async fn reprocess_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<ImageUnit>)> {
    let unit = state.orchestrator.reprocess(id).await?;
    Ok((StatusCode::ACCEPTED, Json(unit)))
}

async fn load_existing(state: &AppState, id: Uuid) -> ApiResult<ImageUnit> {
    image_units::load_unit(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Image unit {}", id)))
}

/// Build image unit routes
pub fn image_routes() -> Router<AppState> {
    Router::new()
        .route("/images", post(create_image))
        .route("/images/:id", get(get_image))
        .route("/images/:id/submit", post(submit_image))
        .route("/images/:id/regions", get(get_regions))
        .route("/images/:id/detections", get(get_detections))
        .route("/images/:id/attempts", get(get_attempts))
        .route("/images/:id/reprocess", post(reprocess_image))
}
