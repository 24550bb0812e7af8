//! Container segmentation
//!
//! Scores the full photo with the segmentation model and turns each box with a
//! known label into a [`ContainerRegion`] in normalized coordinates.

use image::RgbImage;
use uuid::Uuid;

use super::SegmentationError;
use crate::models::parameters::SegmentationParameters;
use crate::models::{ContainerClass, ContainerRegion, NormalizedBox};
use crate::scoring::ScoringBackend;

#[derive(Debug, Clone)]
pub struct ContainerSegmenter {
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl ContainerSegmenter {
    pub fn new(params: &SegmentationParameters) -> Self {
        Self {
            confidence_threshold: params.confidence_threshold,
            iou_threshold: params.iou_threshold,
        }
    }

    /// Segment `image` into container regions (possibly none)
    pub async fn segment(
        &self,
        backend: &dyn ScoringBackend,
        image: &RgbImage,
        image_unit_id: Uuid,
    ) -> Result<Vec<ContainerRegion>, SegmentationError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(SegmentationError::EmptyImage);
        }

        let raw = backend
            .score(image, self.confidence_threshold, self.iou_threshold)
            .await?;

        let mut regions = Vec::with_capacity(raw.len());
        for detection in raw {
            if detection.confidence < self.confidence_threshold || detection.is_degenerate() {
                continue;
            }
            let Some(container_class) = ContainerClass::from_label_id(detection.class_id) else {
                tracing::warn!(
                    image_unit_id = %image_unit_id,
                    class_id = detection.class_id,
                    "Ignoring segment with unknown container label"
                );
                continue;
            };

            let bbox = NormalizedBox::from_pixel_corners(detection.bbox, width, height);
            if bbox.area() <= 0.0 {
                continue;
            }

            let polygon = detection
                .polygon
                .unwrap_or_default()
                .into_iter()
                .map(|[x, y]| {
                    [
                        (x / width as f32).clamp(0.0, 1.0),
                        (y / height as f32).clamp(0.0, 1.0),
                    ]
                })
                .collect();

            regions.push(ContainerRegion {
                id: Uuid::new_v4(),
                image_unit_id,
                region_index: regions.len() as u32,
                container_class,
                bbox,
                polygon,
                confidence: detection.confidence,
            });
        }

        tracing::debug!(
            image_unit_id = %image_unit_id,
            regions = regions.len(),
            "Segments mapped to regions"
        );
        Ok(regions)
    }
}
