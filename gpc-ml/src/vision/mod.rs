//! Image analysis: segmentation, routing, detection and band estimation

pub mod band_estimator;
pub mod color;
pub mod direct;
pub mod geometry;
pub mod router;
pub mod segmenter;
pub mod tiled;
pub mod visualization;

use thiserror::Error;
use uuid::Uuid;

use crate::models::{Detection, DetectionStrategy};
use crate::scoring::{RawDetection, ScoringError};

pub use band_estimator::BandEstimator;
pub use router::route;
pub use segmenter::ContainerSegmenter;

/// Container segmentation errors (fatal for the image unit)
#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("Segmentation scoring failed: {0}")]
    Scoring(#[from] ScoringError),

    #[error("Image is empty")]
    EmptyImage,
}

/// Plant detection errors (fatal for one region only)
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Detection scoring failed: {0}")]
    Scoring(#[from] ScoringError),

    #[error("Region covers no pixels")]
    EmptyRegion,
}

/// Band estimation errors (fatal for one region only)
#[derive(Debug, Error)]
pub enum EstimationError {
    #[error("Estimation config invalid: {0}")]
    InvalidConfig(String),

    #[error("Mask is {mask_width}x{mask_height}, image is {image_width}x{image_height}")]
    DimensionMismatch {
        image_width: u32,
        image_height: u32,
        mask_width: u32,
        mask_height: u32,
    },
}

/// Convert raw model boxes into detections, dropping low-confidence and
/// degenerate boxes. Coordinates stay in the scored image's frame.
pub(crate) fn raw_to_detections(
    raw: Vec<RawDetection>,
    region_id: Uuid,
    confidence_threshold: f32,
    strategy: DetectionStrategy,
) -> Vec<Detection> {
    raw.into_iter()
        .filter(|r| !r.is_degenerate() && r.confidence >= confidence_threshold)
        .map(|r| Detection::from_corners(region_id, r.bbox, r.confidence, strategy))
        .collect()
}
