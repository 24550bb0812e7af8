//! Direct detection: one scoring pass over the whole region crop

use image::RgbImage;
use uuid::Uuid;

use super::{raw_to_detections, DetectionError};
use crate::models::{Detection, DetectionStrategy};
use crate::scoring::ScoringBackend;

/// Score the region crop once. Returned boxes are region-local.
pub async fn detect_direct(
    backend: &dyn ScoringBackend,
    region_image: &RgbImage,
    region_id: Uuid,
    confidence_threshold: f32,
    iou_threshold: f32,
) -> Result<Vec<Detection>, DetectionError> {
    if region_image.width() == 0 || region_image.height() == 0 {
        return Err(DetectionError::EmptyRegion);
    }

    let raw = backend
        .score(region_image, confidence_threshold, iou_threshold)
        .await?;
    let detections =
        raw_to_detections(raw, region_id, confidence_threshold, DetectionStrategy::Direct);

    tracing::debug!(
        region_id = %region_id,
        detections = detections.len(),
        "Direct detection complete"
    );
    Ok(detections)
}
