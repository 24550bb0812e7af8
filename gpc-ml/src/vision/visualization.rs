//! Annotated overlay image for a processed unit

use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use std::io::Cursor;

use super::geometry::PixelRect;
use crate::models::{ContainerClass, ContainerRegion, ProcessingOutcome};

const FAILED_COLOR: Rgb<u8> = Rgb([220, 30, 30]);
const DETECTION_COLOR: Rgb<u8> = Rgb([255, 230, 0]);
const BAND_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

fn class_color(class: ContainerClass) -> Rgb<u8> {
    match class {
        ContainerClass::SmallTray => Rgb([0, 170, 255]),
        ContainerClass::Box => Rgb([170, 0, 255]),
        ContainerClass::LargeBed => Rgb([0, 220, 120]),
    }
}

/// Draw region outlines, band separators and detection markers over a copy
/// of the source image. Outcomes are matched to regions by id.
pub fn render_overlay(
    image: &RgbImage,
    regions: &[ContainerRegion],
    outcomes: &[ProcessingOutcome],
) -> RgbImage {
    let mut canvas = image.clone();
    let (width, height) = image.dimensions();

    for region in regions {
        let Some(rect) = PixelRect::from_normalized(&region.bbox, width, height) else {
            continue;
        };
        let outcome = outcomes.iter().find(|o| o.region_id == region.id);
        let color = match outcome {
            Some(o) if o.is_success() => class_color(region.container_class),
            _ => FAILED_COLOR,
        };

        draw_hollow_rect_mut(
            &mut canvas,
            Rect::at(rect.x as i32, rect.y as i32).of_size(rect.width, rect.height),
            color,
        );

        let Some(outcome) = outcome.filter(|o| o.is_success()) else {
            continue;
        };

        for band in &outcome.estimations {
            if band.band_index == 0 {
                continue;
            }
            let y = (rect.y + band.band_top) as f32;
            draw_line_segment_mut(
                &mut canvas,
                (rect.x as f32, y),
                ((rect.x + rect.width) as f32, y),
                BAND_COLOR,
            );
        }

        for d in &outcome.detections {
            let radius = ((d.width.min(d.height)) / 6.0).round().max(2.0) as i32;
            draw_filled_circle_mut(
                &mut canvas,
                (d.center_x.round() as i32, d.center_y.round() as i32),
                radius,
                DETECTION_COLOR,
            );
        }
    }

    canvas
}

/// PNG bytes for upload
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Detection, DetectionStrategy, NormalizedBox};
    use uuid::Uuid;

    #[test]
    fn test_overlay_marks_regions_and_detections() {
        let image = RgbImage::new(100, 100);
        let region = ContainerRegion {
            id: Uuid::new_v4(),
            image_unit_id: Uuid::new_v4(),
            region_index: 0,
            container_class: ContainerClass::SmallTray,
            bbox: NormalizedBox { x: 0.1, y: 0.1, width: 0.5, height: 0.5 },
            polygon: Vec::new(),
            confidence: 0.9,
        };
        let detection = Detection::from_corners(
            region.id,
            [30.0, 30.0, 42.0, 42.0],
            0.8,
            DetectionStrategy::Direct,
        );
        let outcome = ProcessingOutcome::success(
            region.id,
            0,
            ContainerClass::SmallTray,
            vec![detection],
            None,
            1,
        );

        let overlay = render_overlay(&image, &[region], &[outcome]);

        assert_eq!(*overlay.get_pixel(10, 10), class_color(ContainerClass::SmallTray));
        assert_eq!(*overlay.get_pixel(36, 36), DETECTION_COLOR);
        // Source image untouched
        assert_eq!(*image.get_pixel(10, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_failed_region_drawn_in_failure_color() {
        let image = RgbImage::new(50, 50);
        let region = ContainerRegion {
            id: Uuid::new_v4(),
            image_unit_id: Uuid::new_v4(),
            region_index: 0,
            container_class: ContainerClass::LargeBed,
            bbox: NormalizedBox { x: 0.0, y: 0.0, width: 0.5, height: 0.5 },
            polygon: Vec::new(),
            confidence: 0.9,
        };
        let outcome = ProcessingOutcome::failed(region.id, 0, ContainerClass::LargeBed, "boom", 2);

        let overlay = render_overlay(&image, &[region], &[outcome]);
        assert_eq!(*overlay.get_pixel(0, 0), FAILED_COLOR);

        let png = encode_png(&overlay).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }
}
