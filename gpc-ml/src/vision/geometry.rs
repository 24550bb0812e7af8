//! Pixel geometry: region crops, masks, overlap and coordinate remapping

use image::{GrayImage, Luma, RgbImage};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;

use crate::models::{ContainerRegion, Detection, NormalizedBox};

/// Integer pixel rectangle inside an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// Pixel rectangle for a normalized box, clamped to the image.
    /// Returns None when the box covers no whole pixel.
    pub fn from_normalized(
        bbox: &NormalizedBox,
        image_width: u32,
        image_height: u32,
    ) -> Option<Self> {
        let iw = image_width as f32;
        let ih = image_height as f32;

        let x0 = (bbox.x * iw).floor().clamp(0.0, iw) as u32;
        let y0 = (bbox.y * ih).floor().clamp(0.0, ih) as u32;
        let x1 = ((bbox.x + bbox.width) * iw).ceil().clamp(0.0, iw) as u32;
        let y1 = ((bbox.y + bbox.height) * ih).ceil().clamp(0.0, ih) as u32;

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Copy of `rect` from `image`
pub fn crop(image: &RgbImage, rect: &PixelRect) -> RgbImage {
    image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image()
}

/// Binary mask (255 = inside) of a region in crop-local pixels.
///
/// Uses the polygon when it has at least three distinct points, the whole
/// crop otherwise.
pub fn region_mask(
    region: &ContainerRegion,
    crop: &PixelRect,
    image_width: u32,
    image_height: u32,
) -> GrayImage {
    let mut points: Vec<Point<i32>> = region
        .polygon
        .iter()
        .map(|[nx, ny]| {
            let gx = nx * image_width as f32 - crop.x as f32;
            let gy = ny * image_height as f32 - crop.y as f32;
            Point::new(gx.round() as i32, gy.round() as i32)
        })
        .collect();
    points.dedup();
    // draw_polygon_mut rejects a closed ring
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }

    if points.len() < 3 {
        return GrayImage::from_pixel(crop.width, crop.height, Luma([255]));
    }

    let mut mask = GrayImage::new(crop.width, crop.height);
    draw_polygon_mut(&mut mask, &points, Luma([255]));
    mask
}

/// Black out pixels outside `mask`
pub fn apply_mask(image: &mut RgbImage, mask: &GrayImage) {
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        if mask.get_pixel(x, y)[0] == 0 {
            pixel.0 = [0, 0, 0];
        }
    }
}

/// Intersection over union of two detections' boxes
pub fn iou(a: &Detection, b: &Detection) -> f32 {
    let [ax0, ay0, ax1, ay1] = a.corners();
    let [bx0, by0, bx1, by1] = b.corners();

    let x1 = ax0.max(bx0);
    let y1 = ay0.max(by0);
    let x2 = ax1.min(bx1);
    let y2 = ay1.min(by1);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

/// Remap crop-local detections to the coordinate frame the crop was cut from
pub fn to_parent_frame(detections: Vec<Detection>, crop: &PixelRect) -> Vec<Detection> {
    detections
        .into_iter()
        .map(|d| d.translated(crop.x as f32, crop.y as f32))
        .collect()
}
