//! HTTP surface tests driven through the router with `oneshot`

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;

use gpc_ml::models::ImageStatus;
use helpers::*;

async fn test_app() -> (Router, TestRig) {
    let rig = TestRig::new(
        FnBackend::new("segmenter", |_| Ok(vec![raw(SMALL_TRAY, [0.0, 0.0, 64.0, 64.0], 0.95)])),
        FnBackend::new("detector", |_| Ok(vec![raw(9, [0.0, 0.0, 16.0, 16.0], 0.9)])),
    )
    .await;
    let state = gpc_ml::AppState::new(rig.pool.clone(), Arc::clone(&rig.orchestrator));
    (gpc_ml::build_router(state), rig)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(json) => Body::from(json.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _rig) = test_app().await;

    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "gpc-ml");
    assert_eq!(body["blob_store_circuit"], "closed");
    assert!(body["version"].is_string());
    assert!(body.get("last_error").is_none());
}

#[tokio::test]
async fn test_health_degraded_while_circuit_open() {
    let (app, rig) = test_app().await;
    for _ in 0..rig.breaker.snapshot().failure_threshold {
        let permit = rig.breaker.try_acquire().unwrap();
        rig.breaker.record(permit, false);
    }

    let (_, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["blob_store_circuit"], "open");

    let (status, circuit) = send(&app, "GET", "/circuit", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(circuit["state"], "open");
    assert!(circuit["opened_at"].is_string());
}

#[tokio::test]
async fn test_circuit_endpoint() {
    let (app, _rig) = test_app().await;

    let (status, body) = send(&app, "GET", "/circuit", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "blob_store");
    assert_eq!(body["state"], "closed");
    assert_eq!(body["consecutive_failures"], 0);
}

#[tokio::test]
async fn test_unknown_image_is_404() {
    let (app, _rig) = test_app().await;

    let (status, body) = send(&app, "GET", &format!("/images/{}", Uuid::new_v4()), None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_malformed_image_id_is_rejected() {
    let (app, _rig) = test_app().await;

    let (status, _) = send(&app, "GET", "/images/not-a-uuid", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_image_and_follow_results() {
    let (app, rig) = test_app().await;
    rig.transport.insert("photos/api.png", png(&photo(64, 64, GREEN)));
    let mut events = rig.orchestrator.subscribe();

    let request = json!({"source_key": "photos/api.png"});
    let (status, body) = send(&app, "POST", "/images", Some(request)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["attempt"], 1);
    let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();

    wait_finished(&mut events, id).await;

    let (status, unit) = send(&app, "GET", &format!("/images/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unit["status"], "completed");
    assert_eq!(unit["detected_count"], 1);

    let (_, regions) = send(&app, "GET", &format!("/images/{}/regions", id), None).await;
    assert_eq!(regions["regions"].as_array().unwrap().len(), 1);
    assert_eq!(regions["regions"][0]["container_class"], "small_tray");
    assert_eq!(regions["regions"][0]["outcome_status"], "success");

    let (_, detections) = send(&app, "GET", &format!("/images/{}/detections", id), None).await;
    assert_eq!(detections["detections"].as_array().unwrap().len(), 1);
    assert_eq!(detections["band_estimations"].as_array().unwrap().len(), 0);

    let (_, attempts) = send(&app, "GET", &format!("/images/{}/attempts", id), None).await;
    assert_eq!(attempts["source_key"], "photos/api.png");
    assert_eq!(attempts["attempts"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_image_requires_source_key() {
    let (app, _rig) = test_app().await;

    let (status, body) = send(&app, "POST", "/images", Some(json!({"source_key": "  "}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_submit_pending_then_conflict() {
    let (app, rig) = test_app().await;
    let unit = rig.upload("photos/submit.png", &photo(64, 64, GREEN)).await;
    let mut events = rig.orchestrator.subscribe();

    let uri = format!("/images/{}/submit", unit.id);
    let request = json!({"image_reference": "photos/submit.png"});
    let (status, _) = send(&app, "POST", &uri, Some(request.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    wait_finished(&mut events, unit.id).await;
    assert_eq!(rig.load(unit.id).await.status, ImageStatus::Completed);

    let (status, body) = send(&app, "POST", &uri, Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_reprocess_endpoint() {
    let (app, rig) = test_app().await;
    let unit = rig.upload("photos/again.png", &photo(64, 64, GREEN)).await;

    // Still pending: nothing to reprocess yet
    let (status, _) = send(&app, "POST", &format!("/images/{}/reprocess", unit.id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    rig.orchestrator.process(unit.id, &unit.source_key).await.unwrap();
    let mut events = rig.orchestrator.subscribe();

    let (status, body) = send(&app, "POST", &format!("/images/{}/reprocess", unit.id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["attempt"], 2);
    assert_eq!(body["reprocess_of"], unit.id.to_string());

    let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();
    wait_finished(&mut events, id).await;

    let uri = format!("/images/{}/reprocess", Uuid::new_v4());
    let (status, _) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_parameters_roundtrip() {
    let (app, _rig) = test_app().await;

    let (status, params) = send(&app, "GET", "/parameters", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(params["workers"]["child_max_attempts"], 1);
    assert_eq!(params["detection"]["tile_size"], 640);

    let mut updated = params.clone();
    updated["detection"]["tile_size"] = json!(512);
    let (status, body) = send(&app, "PUT", "/parameters", Some(updated)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "saved");

    let (_, params) = send(&app, "GET", "/parameters", None).await;
    assert_eq!(params["detection"]["tile_size"], 512);
    assert_eq!(params["workers"]["child_max_attempts"], 1);
}

#[tokio::test]
async fn test_invalid_parameters_rejected() {
    let (app, _rig) = test_app().await;

    let invalid = json!({"estimation": {"band_count": 0}});
    let (status, body) = send(&app, "PUT", "/parameters", Some(invalid)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("band_count"));

    let (_, params) = send(&app, "GET", "/parameters", None).await;
    assert_eq!(params["estimation"]["band_count"], 4);
}

#[tokio::test]
async fn test_calibration_samples_update_defaults() {
    let (app, _rig) = test_app().await;

    let (_, defaults) = send(&app, "GET", "/calibration", None).await;
    assert_eq!(defaults["large_bed"], 600.0);

    let (status, body) = send(
        &app,
        "POST",
        "/calibration",
        Some(json!({
            "container_class": "large_bed",
            "verified_count": 10,
            "plant_area_px": 5000.0
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["container_class"], "large_bed");
    assert_eq!(body["area_per_plant_px"], 500.0);

    let (_, defaults) = send(&app, "GET", "/calibration", None).await;
    assert_eq!(defaults["large_bed"], 500.0);
    assert_eq!(defaults["small_tray"], 400.0);
}

#[tokio::test]
async fn test_calibration_rejects_zero_count() {
    let (app, _rig) = test_app().await;

    let (status, _) = send(
        &app,
        "POST",
        "/calibration",
        Some(json!({"container_class": "box", "verified_count": 0, "plant_area_px": 100.0})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
