//! Blob store circuit breaker snapshot

use axum::{extract::State, routing::get, Json, Router};

use crate::blob::CircuitSnapshot;
use crate::AppState;

/// GET /circuit
pub async fn get_circuit(State(state): State<AppState>) -> Json<CircuitSnapshot> {
    Json(state.breaker.snapshot())
}

pub fn circuit_routes() -> Router<AppState> {
    Router::new().route("/circuit", get(get_circuit))
}
