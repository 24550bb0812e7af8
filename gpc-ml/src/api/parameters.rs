//! Pipeline parameter endpoints
//!
//! `GET /parameters` returns the effective parameters (stored values over
//! defaults). `PUT /parameters` replaces them after validation; the new
//! values apply to units dispatched afterwards. Circuit breaker and blob
//! retry settings are read once at startup.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::db::parameters::{load_pipeline_parameters, save_pipeline_parameters};
use crate::error::{ApiError, ApiResult};
use crate::models::PipelineParameters;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct UpdateParametersResponse {
    pub status: String,
    pub parameters: PipelineParameters,
}

/// GET /parameters
pub async fn get_parameters(State(state): State<AppState>) -> ApiResult<Json<PipelineParameters>> {
    let parameters = load_pipeline_parameters(&state.db).await?;
    Ok(Json(parameters))
}

/// PUT /parameters
pub async fn put_parameters(
    State(state): State<AppState>,
    Json(parameters): Json<PipelineParameters>,
) -> ApiResult<Json<UpdateParametersResponse>> {
    parameters.validate().map_err(ApiError::BadRequest)?;
    save_pipeline_parameters(&state.db, &parameters).await?;

    tracing::info!(?parameters, "Pipeline parameters updated");

    Ok(Json(UpdateParametersResponse {
        status: "saved".to_string(),
        parameters,
    }))
}

/// Build parameter routes
pub fn parameter_routes() -> Router<AppState> {
    Router::new().route("/parameters", get(get_parameters).put(put_parameters))
}
