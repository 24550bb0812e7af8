//! Tiled detection for large regions
//!
//! The region crop is cut into overlapping square tiles. Each tile with enough
//! content is scored independently, tile-local boxes are shifted into
//! region-local coordinates, and duplicates across tile seams are merged
//! greedily by confidence.

use image::RgbImage;
use uuid::Uuid;

use super::geometry::{self, PixelRect};
use super::{raw_to_detections, DetectionError};
use crate::models::parameters::DetectionParameters;
use crate::models::{Detection, DetectionStrategy};
use crate::scoring::ScoringBackend;

/// Channel value at or below which a pixel counts as black
const NEAR_BLACK: u8 = 8;

/// Tiling configuration for one region
#[derive(Debug, Clone)]
pub struct TileConfig {
    pub tile_size: u32,
    /// Overlap between neighbouring tiles in pixels
    pub overlap: u32,
    pub min_content_ratio: f32,
    pub merge_iou_threshold: f32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl TileConfig {
    pub fn from_parameters(params: &DetectionParameters) -> Self {
        let overlap = (params.tile_size as f32 * params.tile_overlap_ratio).round() as u32;
        Self {
            tile_size: params.tile_size,
            overlap: overlap.min(params.tile_size.saturating_sub(1)),
            min_content_ratio: params.tile_min_content_ratio,
            merge_iou_threshold: params.merge_iou_threshold,
            confidence_threshold: params.confidence_threshold,
            iou_threshold: params.iou_threshold,
        }
    }

    /// Top-left corners of tiles covering a `width × height` image.
    ///
    /// The last row and column are aligned to the far edge, so every pixel is
    /// covered and no tile extends past the image.
    pub fn tile_positions(&self, width: u32, height: u32) -> Vec<(u32, u32)> {
        let xs = axis_positions(width, self.tile_size, self.overlap);
        let ys = axis_positions(height, self.tile_size, self.overlap);

        let mut positions = Vec::with_capacity(xs.len() * ys.len());
        for &y in &ys {
            for &x in &xs {
                positions.push((x, y));
            }
        }
        positions
    }
}

fn axis_positions(length: u32, tile_size: u32, overlap: u32) -> Vec<u32> {
    if length <= tile_size {
        return vec![0];
    }

    let stride = tile_size.saturating_sub(overlap).max(1);
    let last = length - tile_size;
    let count = ((last as f32) / stride as f32).ceil() as u32 + 1;

    let mut positions: Vec<u32> = (0..count)
        .map(|i| if i == count - 1 { last } else { (i * stride).min(last) })
        .collect();
    positions.dedup();
    positions
}

/// Share of pixels that are not (near) black
pub fn content_ratio(tile: &RgbImage) -> f32 {
    let total = tile.width() as usize * tile.height() as usize;
    if total == 0 {
        return 0.0;
    }
    let non_black = tile
        .pixels()
        .filter(|p| p.0.iter().any(|&c| c > NEAR_BLACK))
        .count();
    non_black as f32 / total as f32
}

/// Greedy merge: keep the most confident box, drop candidates overlapping a
/// kept box above `iou_threshold`.
///
/// The output never contains a pair above the threshold, so merging it again
/// returns it unchanged.
pub fn merge_detections(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let duplicate = kept
            .iter()
            .any(|k| geometry::iou(k, &candidate) > iou_threshold);
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}

/// Run tiled detection over a region crop. Returned boxes are region-local.
pub async fn detect_tiled(
    backend: &dyn ScoringBackend,
    region_image: &RgbImage,
    region_id: Uuid,
    config: &TileConfig,
) -> Result<Vec<Detection>, DetectionError> {
    let (width, height) = region_image.dimensions();
    if width == 0 || height == 0 {
        return Err(DetectionError::EmptyRegion);
    }

    let positions = config.tile_positions(width, height);
    let mut candidates = Vec::new();
    let mut scored_tiles = 0usize;

    for (x, y) in positions.iter().copied() {
        let rect = PixelRect {
            x,
            y,
            width: config.tile_size.min(width - x),
            height: config.tile_size.min(height - y),
        };
        let tile = geometry::crop(region_image, &rect);

        if content_ratio(&tile) < config.min_content_ratio {
            tracing::trace!(region_id = %region_id, x, y, "Skipping near-empty tile");
            continue;
        }

        let raw = backend
            .score(&tile, config.confidence_threshold, config.iou_threshold)
            .await?;
        scored_tiles += 1;

        let threshold = config.confidence_threshold;
        let local = raw_to_detections(raw, region_id, threshold, DetectionStrategy::Tiled);
        candidates.extend(geometry::to_parent_frame(local, &rect));
    }

    let candidate_count = candidates.len();
    let merged = merge_detections(candidates, config.merge_iou_threshold);

    tracing::debug!(
        region_id = %region_id,
        tiles = positions.len(),
        scored_tiles,
        candidates = candidate_count,
        merged = merged.len(),
        "Tiled detection complete"
    );

    Ok(merged)
}
