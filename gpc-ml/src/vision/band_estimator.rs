//! Band-based count estimation for large beds
//!
//! Dense beds hide plants the detector cannot separate. The estimator works
//! out how much plantable area the detections did *not* cover and converts it
//! to a count, band by band:
//!
//! 1. Draw a filled circle per detection (the coverage mask).
//! 2. Residual = region mask minus coverage, cleaned with a morphological
//!    opening so single-pixel slivers between circles do not count.
//! 3. Split the region into horizontal bands. Perspective makes plants near
//!    the camera look larger, so each band calibrates its own area-per-plant
//!    from the detections centred in it, falling back to the class default.
//! 4. Plantable pixels are residual pixels that look like vegetation (HSV
//!    window) and are not darker than an adaptive fraction of the band's mean
//!    brightness.
//! 5. `count = ceil(plantable_area / (area_per_plant × bias_factor))`.
//!
//! All coordinates here are region-local.

use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::drawing::draw_filled_circle_mut;
use imageproc::morphology;
use uuid::Uuid;

use super::color::{rgb_to_hsv, VegetationFilter};
use super::EstimationError;
use crate::models::parameters::EstimationParameters;
use crate::models::{BandEstimation, CalibrationSource, Detection};

/// Confidence assigned when a band falls back to the class default
const FALLBACK_CONFIDENCE: f32 = 0.3;

#[derive(Debug, Clone)]
pub struct BandEstimatorConfig {
    pub band_count: u32,
    pub bias_factor: f64,
    /// Class default area-per-plant in px² (possibly calibrated)
    pub default_area_per_plant_px: f64,
    pub vegetation: VegetationFilter,
    pub adaptive_brightness_ratio: f32,
    pub opening_radius: u8,
}

impl BandEstimatorConfig {
    pub fn from_parameters(params: &EstimationParameters, default_area_per_plant_px: f64) -> Self {
        Self {
            band_count: params.band_count,
            bias_factor: params.bias_factor,
            default_area_per_plant_px,
            vegetation: VegetationFilter {
                hue_min_deg: params.vegetation_hue_min_deg,
                hue_max_deg: params.vegetation_hue_max_deg,
                saturation_min: params.vegetation_saturation_min,
                value_min: params.vegetation_value_min,
            },
            adaptive_brightness_ratio: params.adaptive_brightness_ratio,
            opening_radius: params.opening_radius,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BandEstimator {
    config: BandEstimatorConfig,
}

impl BandEstimator {
    pub fn new(config: BandEstimatorConfig) -> Result<Self, EstimationError> {
        if config.band_count == 0 {
            return Err(EstimationError::InvalidConfig("band_count must be >= 1".to_string()));
        }
        if !(config.bias_factor > 0.0) {
            return Err(EstimationError::InvalidConfig(format!(
                "bias_factor must be positive (got {})",
                config.bias_factor
            )));
        }
        if !(config.default_area_per_plant_px > 0.0) {
            return Err(EstimationError::InvalidConfig(format!(
                "default area-per-plant must be positive (got {})",
                config.default_area_per_plant_px
            )));
        }
        Ok(Self { config })
    }

    /// Estimate one result per band. A band with no plantable area still
    /// yields a (zero) estimate.
    pub fn estimate(
        &self,
        region_image: &RgbImage,
        region_mask: &GrayImage,
        detections: &[Detection],
        region_id: Uuid,
    ) -> Result<Vec<BandEstimation>, EstimationError> {
        let (width, height) = region_image.dimensions();
        if region_mask.dimensions() != (width, height) {
            return Err(EstimationError::DimensionMismatch {
                image_width: width,
                image_height: height,
                mask_width: region_mask.width(),
                mask_height: region_mask.height(),
            });
        }

        let coverage = coverage_mask(width, height, detections);
        let residual = residual_mask(region_mask, &coverage, self.config.opening_radius);

        let mut bands = Vec::with_capacity(self.config.band_count as usize);
        for (band_index, (top, bottom)) in band_bounds(height, self.config.band_count)
            .into_iter()
            .enumerate()
        {
            let in_band = detections_in_band(detections, top, bottom);
            let (area_per_plant_px, calibration) = match mean_box_area(&in_band) {
                Some(area) => (area, CalibrationSource::Detections),
                None => (self.config.default_area_per_plant_px, CalibrationSource::ClassDefault),
            };

            let residual_area_px =
                self.plantable_area(region_image, region_mask, &residual, top, bottom);
            let estimated_count =
                estimate_count(residual_area_px, area_per_plant_px, self.config.bias_factor);

            bands.push(BandEstimation {
                region_id,
                band_index: band_index as u32,
                band_top: top,
                band_bottom: bottom,
                residual_area_px,
                area_per_plant_px,
                calibration,
                estimated_count,
                confidence: band_confidence(calibration, in_band.len()),
            });
        }

        tracing::debug!(
            region_id = %region_id,
            bands = bands.len(),
            estimated = bands.iter().map(|b| u64::from(b.estimated_count)).sum::<u64>(),
            "Band estimation complete"
        );

        Ok(bands)
    }

    /// Residual pixels in rows `[top, bottom)` that pass the vegetation and
    /// adaptive brightness tests
    fn plantable_area(
        &self,
        image: &RgbImage,
        region_mask: &GrayImage,
        residual: &GrayImage,
        top: u32,
        bottom: u32,
    ) -> u64 {
        if top >= bottom {
            return 0;
        }

        let mut value_sum = 0.0f64;
        let mut value_count = 0u64;
        for y in top..bottom {
            for x in 0..image.width() {
                if region_mask.get_pixel(x, y)[0] > 0 {
                    let [r, g, b] = image.get_pixel(x, y).0;
                    value_sum += f64::from(r.max(g).max(b)) / 255.0;
                    value_count += 1;
                }
            }
        }
        if value_count == 0 {
            return 0;
        }

        let mean_value = (value_sum / value_count as f64) as f32;
        let brightness_floor = (mean_value * self.config.adaptive_brightness_ratio)
            .max(self.config.vegetation.value_min);

        let mut area = 0u64;
        for y in top..bottom {
            for x in 0..image.width() {
                if residual.get_pixel(x, y)[0] == 0 {
                    continue;
                }
                let [r, g, b] = image.get_pixel(x, y).0;
                let (h, s, v) = rgb_to_hsv(r, g, b);
                if self.config.vegetation.matches(h, s, v) && v >= brightness_floor {
                    area += 1;
                }
            }
        }
        area
    }
}

/// Filled circle per detection; diameter is the mean of the box sides
pub fn coverage_mask(width: u32, height: u32, detections: &[Detection]) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    for d in detections {
        let radius = ((d.width + d.height) / 4.0).round().max(1.0) as i32;
        draw_filled_circle_mut(
            &mut mask,
            (d.center_x.round() as i32, d.center_y.round() as i32),
            radius,
            Luma([255]),
        );
    }
    mask
}

/// Region minus coverage, then opened with an L∞ structuring element
pub fn residual_mask(
    region_mask: &GrayImage,
    coverage: &GrayImage,
    opening_radius: u8,
) -> GrayImage {
    let mut residual = region_mask.clone();
    for (x, y, pixel) in residual.enumerate_pixels_mut() {
        if coverage.get_pixel(x, y)[0] > 0 {
            pixel.0 = [0];
        }
    }

    if opening_radius == 0 {
        return residual;
    }
    morphology::open(&residual, Norm::LInf, opening_radius)
}

/// `[top, bottom)` rows of `band_count` equal horizontal bands
pub fn band_bounds(height: u32, band_count: u32) -> Vec<(u32, u32)> {
    let h = u64::from(height);
    let n = u64::from(band_count.max(1));
    (0..n)
        .map(|i| ((i * h / n) as u32, ((i + 1) * h / n) as u32))
        .collect()
}

fn detections_in_band(detections: &[Detection], top: u32, bottom: u32) -> Vec<&Detection> {
    detections
        .iter()
        .filter(|d| d.center_y >= top as f32 && d.center_y < bottom as f32)
        .collect()
}

fn mean_box_area(detections: &[&Detection]) -> Option<f64> {
    if detections.is_empty() {
        return None;
    }
    let total: f64 = detections.iter().map(|d| f64::from(d.area())).sum();
    let mean = total / detections.len() as f64;
    (mean > 0.0).then_some(mean)
}

/// `ceil(area / (area_per_plant × bias))`; zero area is zero plants
pub fn estimate_count(plantable_area_px: u64, area_per_plant_px: f64, bias_factor: f64) -> u32 {
    if plantable_area_px == 0 {
        return 0;
    }
    let effective = area_per_plant_px * bias_factor;
    if !(effective > 0.0) {
        return 0;
    }
    (plantable_area_px as f64 / effective).ceil() as u32
}

/// More calibrating detections → more trust, capped at 0.95
pub fn band_confidence(calibration: CalibrationSource, calibrating_detections: usize) -> f32 {
    match calibration {
        CalibrationSource::ClassDefault => FALLBACK_CONFIDENCE,
        CalibrationSource::Detections => (0.5 + 0.05 * calibrating_detections as f32).min(0.95),
    }
}
