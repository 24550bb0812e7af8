//! Child work unit: detection (and estimation) for one container region
//!
//! Every error raised while processing a region ends up as a failed
//! [`ProcessingOutcome`]; nothing propagates to the parent. Each attempt runs
//! as its own task under a time budget. An attempt that overruns is recorded
//! as a failure and left to finish in the background; its late result is
//! discarded. The detector slot is held by the worker, not by the attempt
//! task, so an overrun attempt gives its slot back when it is abandoned.
//! Retries replace the previous attempt's output.

use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

use crate::models::{
    BandEstimation, ClassAreaDefaults, ContainerRegion, Detection, DetectionStrategy,
    PipelineParameters, ProcessingOutcome,
};
use crate::scoring::{ModelPool, ScoringBackend, ScoringError};
use crate::vision::band_estimator::BandEstimatorConfig;
use crate::vision::geometry::{self, PixelRect};
use crate::vision::tiled::{detect_tiled, TileConfig};
use crate::vision::{direct, router, BandEstimator, DetectionError, EstimationError};

/// Errors from one region attempt
#[derive(Debug, Error)]
pub enum RegionError {
    #[error("Region bounding box covers no pixels")]
    EmptyRegion,

    #[error("No detector available: {0}")]
    Scoring(#[from] ScoringError),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error("Estimation failed: {0}")]
    Estimation(#[from] EstimationError),

    #[error("Region task aborted: {0}")]
    Aborted(String),
}

/// Shared, read-only inputs for every child of one image unit
pub struct RegionContext {
    pub detector_pool: ModelPool<dyn ScoringBackend>,
    pub params: PipelineParameters,
    /// Per-class area-per-plant fallback (calibrated where samples exist)
    pub class_defaults: ClassAreaDefaults,
}

type RegionResult = (Vec<Detection>, Option<Vec<BandEstimation>>);

/// Process one region with bounded retries. Never fails.
pub async fn run_region(
    ctx: Arc<RegionContext>,
    image: Arc<RgbImage>,
    region: ContainerRegion,
) -> ProcessingOutcome {
    let workers = &ctx.params.workers;
    let budget = Duration::from_secs(workers.child_timeout_secs);
    let max_attempts = workers.child_max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let run = run_attempt(Arc::clone(&ctx), Arc::clone(&image), region.clone());

        let error = match timeout(budget, run).await {
            Ok(Ok((detections, estimations))) => {
                tracing::debug!(
                    region_id = %region.id,
                    region_index = region.region_index,
                    attempt,
                    detections = detections.len(),
                    "Region processed"
                );
                return ProcessingOutcome::success(
                    region.id,
                    region.region_index,
                    region.container_class,
                    detections,
                    estimations,
                    attempt,
                );
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("Timed out after {}s", budget.as_secs()),
        };

        if attempt >= max_attempts {
            tracing::warn!(
                region_id = %region.id,
                region_index = region.region_index,
                container_class = %region.container_class,
                attempts = attempt,
                error = %error,
                "Region failed"
            );
            return ProcessingOutcome::failed(
                region.id,
                region.region_index,
                region.container_class,
                error,
                attempt,
            );
        }

        let delay = retry_delay(workers.child_retry_delay_ms, attempt);
        tracing::warn!(
            region_id = %region.id,
            region_index = region.region_index,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Region attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Exponential backoff between child attempts, capped at 30s
fn retry_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(16);
    Duration::from_millis(base_ms.saturating_mul(factor).min(30_000))
}

/// Take a detector slot and run one attempt as its own task. Dropping this
/// future releases the slot even while the task is still running.
async fn run_attempt(
    ctx: Arc<RegionContext>,
    image: Arc<RgbImage>,
    region: ContainerRegion,
) -> Result<RegionResult, RegionError> {
    let slot = ctx.detector_pool.acquire().await?;
    let task = tokio::spawn(process_region(Arc::clone(&ctx), slot.instance(), image, region));
    task.await.map_err(|e| RegionError::Aborted(e.to_string()))?
}

/// One attempt: crop, detect with the routed strategy, estimate if eligible,
/// then remap detections to full-image pixels.
async fn process_region(
    ctx: Arc<RegionContext>,
    backend: Arc<dyn ScoringBackend>,
    image: Arc<RgbImage>,
    region: ContainerRegion,
) -> Result<RegionResult, RegionError> {
    let (width, height) = image.dimensions();
    let rect = PixelRect::from_normalized(&region.bbox, width, height)
        .ok_or(RegionError::EmptyRegion)?;

    let mut crop = geometry::crop(&image, &rect);
    let mask = geometry::region_mask(&region, &rect, width, height);
    geometry::apply_mask(&mut crop, &mask);

    let detection = &ctx.params.detection;
    let local = match router::route(region.container_class) {
        DetectionStrategy::Tiled => {
            let config = TileConfig::from_parameters(detection);
            detect_tiled(&*backend, &crop, region.id, &config).await?
        }
        DetectionStrategy::Direct => {
            direct::detect_direct(
                &*backend,
                &crop,
                region.id,
                detection.confidence_threshold,
                detection.iou_threshold,
            )
            .await?
        }
    };

    let estimations = if router::estimation_applies(region.container_class) {
        let config = BandEstimatorConfig::from_parameters(
            &ctx.params.estimation,
            ctx.class_defaults.for_class(region.container_class),
        );
        let estimator = BandEstimator::new(config)?;
        let detections = local.clone();
        let region_id = region.id;

        let estimate = move || estimator.estimate(&crop, &mask, &detections, region_id);
        let bands = tokio::task::spawn_blocking(estimate)
            .await
            .map_err(|e| RegionError::Aborted(e.to_string()))??;
        Some(bands)
    } else {
        None
    };

    Ok((geometry::to_parent_frame(local, &rect), estimations))
}
