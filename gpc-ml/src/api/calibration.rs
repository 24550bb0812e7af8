//! Calibration samples from verified manual counts
//!
//! `POST /calibration` stores a sample; `GET /calibration` shows the
//! area-per-plant fallback currently in effect per container class.

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{calibration, parameters};
use crate::error::ApiResult;
use crate::models::{ClassAreaDefaults, ContainerClass};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CalibrationRequest {
    pub container_class: ContainerClass,
    /// Plants counted by hand
    pub verified_count: u32,
    /// Vegetation area (px²) those plants cover
    pub plant_area_px: f64,
    #[serde(default)]
    pub image_unit_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CalibrationResponse {
    pub sample_id: Uuid,
    pub container_class: ContainerClass,
    pub area_per_plant_px: f64,
}

/// POST /calibration
pub async fn record_sample(
    State(state): State<AppState>,
    Json(request): Json<CalibrationRequest>,
) -> ApiResult<(StatusCode, Json<CalibrationResponse>)> {
    let sample_id = calibration::record_calibration_sample(
        &state.db,
        request.container_class,
        request.verified_count,
        request.plant_area_px,
        request.image_unit_id,
    )
    .await?;

    let area_per_plant_px = calibration::class_area_per_plant(&state.db, request.container_class)
        .await?
        .unwrap_or(request.plant_area_px / f64::from(request.verified_count));

    Ok((
        StatusCode::CREATED,
        Json(CalibrationResponse {
            sample_id,
            container_class: request.container_class,
            area_per_plant_px,
        }),
    ))
}

/// GET /calibration
pub async fn get_defaults(State(state): State<AppState>) -> ApiResult<Json<ClassAreaDefaults>> {
    let params = parameters::load_pipeline_parameters(&state.db).await?;
    let defaults =
        calibration::load_class_defaults(&state.db, &params.estimation.default_area_per_plant)
            .await?;
    Ok(Json(defaults))
}

pub fn calibration_routes() -> Router<AppState> {
    Router::new().route("/calibration", get(get_defaults).post(record_sample))
}
