//! Background dispatch and reprocessing of finished units

mod helpers;

use gpc_ml::db::{image_units, results};
use gpc_ml::models::ImageStatus;
use gpc_ml::pipeline::{PipelineError, PipelineEvent};
use helpers::*;
use uuid::Uuid;

fn one_tray_backends() -> (FnBackend, FnBackend) {
    (
        FnBackend::new("segmenter", |_| Ok(vec![raw(SMALL_TRAY, [0.0, 0.0, 64.0, 64.0], 0.95)])),
        FnBackend::new("detector", |_| Ok(vec![raw(9, [0.0, 0.0, 16.0, 16.0], 0.9)])),
    )
}

#[tokio::test]
async fn test_create_and_submit_runs_in_background() {
    let (segmenter, detector) = one_tray_backends();
    let rig = TestRig::new(segmenter, detector).await;
    rig.transport.insert("photos/bg.png", png(&photo(64, 64, GREEN)));
    let mut events = rig.orchestrator.subscribe();

    let unit = rig.orchestrator.create_and_submit("photos/bg.png").await.unwrap();
    assert_eq!(unit.status, ImageStatus::Pending);
    assert_eq!(unit.attempt, 1);

    match wait_finished(&mut events, unit.id).await {
        PipelineEvent::UnitFinished { status, detected_count, .. } => {
            assert_eq!(status, ImageStatus::Completed);
            assert_eq!(detected_count, 1);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(rig.load(unit.id).await.status, ImageStatus::Completed);
}

#[tokio::test]
async fn test_reprocess_creates_new_attempt() {
    let (segmenter, detector) = one_tray_backends();
    let rig = TestRig::new(segmenter, detector).await;
    let first = rig.upload("photos/r.png", &photo(64, 64, GREEN)).await;
    let first = rig.orchestrator.process(first.id, &first.source_key).await.unwrap();
    let mut events = rig.orchestrator.subscribe();

    let second = rig.orchestrator.reprocess(first.id).await.unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(second.attempt, 2);
    assert_eq!(second.reprocess_of, Some(first.id));
    assert_eq!(second.source_key, first.source_key);

    wait_finished(&mut events, second.id).await;

    // The earlier attempt and its results are untouched
    let before = rig.load(first.id).await;
    assert_eq!(before.status, ImageStatus::Completed);
    assert_eq!(before.detected_count, 1);
    assert_eq!(results::load_detections(&rig.pool, first.id).await.unwrap().len(), 1);

    let after = rig.load(second.id).await;
    assert_eq!(after.status, ImageStatus::Completed);
    assert_eq!(results::load_detections(&rig.pool, second.id).await.unwrap().len(), 1);

    let attempts = image_units::list_attempts(&rig.pool, "photos/r.png").await.unwrap();
    assert_eq!(attempts.iter().map(|u| u.attempt).collect::<Vec<_>>(), vec![1, 2]);
}

#[tokio::test]
async fn test_reprocess_numbers_attempts_past_latest() {
    let (segmenter, detector) = one_tray_backends();
    let rig = TestRig::new(segmenter, detector).await;
    let first = rig.upload("photos/n.png", &photo(64, 64, GREEN)).await;
    rig.orchestrator.process(first.id, &first.source_key).await.unwrap();
    let mut events = rig.orchestrator.subscribe();

    let second = rig.orchestrator.reprocess(first.id).await.unwrap();
    wait_finished(&mut events, second.id).await;

    // Reprocessing the first attempt again still moves forward
    let third = rig.orchestrator.reprocess(first.id).await.unwrap();
    assert_eq!(third.attempt, 3);
    assert_eq!(third.reprocess_of, Some(first.id));
    wait_finished(&mut events, third.id).await;
}

#[tokio::test]
async fn test_reprocess_rejects_unfinished_unit() {
    let (segmenter, detector) = one_tray_backends();
    let rig = TestRig::new(segmenter, detector).await;
    let pending = rig.upload("photos/p.png", &photo(64, 64, GREEN)).await;

    let err = rig.orchestrator.reprocess(pending.id).await.unwrap_err();
    assert!(
        matches!(err, PipelineError::NotTerminal { status: ImageStatus::Pending, .. }),
        "{:?}",
        err
    );
    assert_eq!(image_units::list_attempts(&rig.pool, "photos/p.png").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reprocess_unknown_unit() {
    let (segmenter, detector) = one_tray_backends();
    let rig = TestRig::new(segmenter, detector).await;

    let missing = Uuid::new_v4();
    let err = rig.orchestrator.reprocess(missing).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(id) if id == missing), "{:?}", err);
}

#[tokio::test]
async fn test_reprocess_after_failure_can_succeed() {
    let (segmenter, detector) = one_tray_backends();
    let rig = TestRig::new(segmenter, detector).await;
    let unit = gpc_ml::models::ImageUnit::new("photos/late.png");
    image_units::insert_unit(&rig.pool, &unit).await.unwrap();

    // Photo not uploaded yet: the first attempt fails
    assert!(rig.orchestrator.process(unit.id, &unit.source_key).await.is_err());
    assert_eq!(rig.load(unit.id).await.status, ImageStatus::Failed);

    rig.transport.insert("photos/late.png", png(&photo(64, 64, GREEN)));
    let mut events = rig.orchestrator.subscribe();
    let retry = rig.orchestrator.reprocess(unit.id).await.unwrap();
    wait_finished(&mut events, retry.id).await;

    assert_eq!(rig.load(retry.id).await.status, ImageStatus::Completed);
    assert_eq!(rig.load(unit.id).await.status, ImageStatus::Failed);
}

#[tokio::test]
async fn test_reprocess_reads_dispatched_reference() {
    let (segmenter, detector) = one_tray_backends();
    let rig = TestRig::new(segmenter, detector).await;

    // Upload key and stored object differ; the unit is dispatched by reference
    let unit = gpc_ml::models::ImageUnit::new("uploads/abc");
    image_units::insert_unit(&rig.pool, &unit).await.unwrap();
    rig.transport.insert("blobs/abc.png", png(&photo(64, 64, GREEN)));

    let first = rig.orchestrator.process(unit.id, "blobs/abc.png").await.unwrap();
    assert_eq!(first.status, ImageStatus::Completed);
    let stored = rig.load(unit.id).await;
    assert_eq!(stored.source_key, "uploads/abc");
    assert_eq!(stored.image_reference.as_deref(), Some("blobs/abc.png"));

    let mut events = rig.orchestrator.subscribe();
    let second = rig.orchestrator.reprocess(unit.id).await.unwrap();
    assert_eq!(second.image_reference.as_deref(), Some("blobs/abc.png"));

    match wait_finished(&mut events, second.id).await {
        PipelineEvent::UnitFinished { status, failure_reason, .. } => {
            assert_eq!(status, ImageStatus::Completed, "{:?}", failure_reason);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let after = rig.load(second.id).await;
    assert_eq!(after.detected_count, 1);
    assert_eq!(after.image_reference.as_deref(), Some("blobs/abc.png"));
    assert_eq!(image_units::list_attempts(&rig.pool, "uploads/abc").await.unwrap().len(), 2);
}
