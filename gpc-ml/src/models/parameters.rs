//! Pipeline tuning parameters
//!
//! Stored in the `settings` table as flattened dotted keys
//! (`detection.tile_size`, `estimation.bias_factor`, ...). Missing keys fall
//! back to the serde defaults below.

use serde::{Deserialize, Serialize};

use super::region::ContainerClass;

/// All tunable pipeline parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PipelineParameters {
    #[serde(default)]
    pub segmentation: SegmentationParameters,

    #[serde(default)]
    pub detection: DetectionParameters,

    #[serde(default)]
    pub estimation: EstimationParameters,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerParameters,

    #[serde(default)]
    pub retry: RetryParameters,

    #[serde(default)]
    pub workers: WorkerParameters,
}

/// Container segmentation scoring thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationParameters {
    /// Minimum segmentation confidence (default: 0.5)
    #[serde(default = "default_segmentation_confidence")]
    pub confidence_threshold: f32,

    /// NMS IoU threshold passed to the model (default: 0.5)
    #[serde(default = "default_segmentation_iou")]
    pub iou_threshold: f32,
}

/// Plant detection parameters (both strategies)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionParameters {
    /// Minimum detection confidence (default: 0.25)
    #[serde(default = "default_detection_confidence")]
    pub confidence_threshold: f32,

    /// NMS IoU threshold passed to the model (default: 0.45)
    #[serde(default = "default_detection_iou")]
    pub iou_threshold: f32,

    /// Square tile edge in pixels (default: 640)
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,

    /// Fraction of the tile shared with its neighbour (default: 0.25)
    #[serde(default = "default_tile_overlap_ratio")]
    pub tile_overlap_ratio: f32,

    /// Tiles with a smaller non-black share are skipped (default: 0.02)
    #[serde(default = "default_tile_min_content_ratio")]
    pub tile_min_content_ratio: f32,

    /// IoU above which tiled candidates are merged (default: 0.45)
    #[serde(default = "default_merge_iou_threshold")]
    pub merge_iou_threshold: f32,
}

/// Band estimation parameters (large beds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationParameters {
    /// Horizontal bands per region (default: 4)
    #[serde(default = "default_band_count")]
    pub band_count: u32,

    /// Divisor bias on area-per-plant; below 1.0 counts up (default: 0.9)
    #[serde(default = "default_bias_factor")]
    pub bias_factor: f64,

    /// Fallback area-per-plant in px² when a band has no detections
    #[serde(default)]
    pub default_area_per_plant: ClassAreaDefaults,

    /// Vegetation hue window in degrees (default: 60 - 170)
    #[serde(default = "default_hue_min")]
    pub vegetation_hue_min_deg: f32,
    #[serde(default = "default_hue_max")]
    pub vegetation_hue_max_deg: f32,

    /// Minimum HSV saturation for vegetation (default: 0.15)
    #[serde(default = "default_saturation_min")]
    pub vegetation_saturation_min: f32,

    /// Minimum HSV value for vegetation (default: 0.15)
    #[serde(default = "default_value_min")]
    pub vegetation_value_min: f32,

    /// Pixels darker than `ratio × band mean value` are not plantable (default: 0.6)
    #[serde(default = "default_adaptive_brightness_ratio")]
    pub adaptive_brightness_ratio: f32,

    /// Morphological opening radius applied to the residual mask (default: 1)
    #[serde(default = "default_opening_radius")]
    pub opening_radius: u8,
}

/// Per-class area-per-plant defaults in px²
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassAreaDefaults {
    #[serde(default = "default_small_tray_area")]
    pub small_tray: f64,
    #[serde(default = "default_box_area")]
    pub box_container: f64,
    #[serde(default = "default_large_bed_area")]
    pub large_bed: f64,
}

impl ClassAreaDefaults {
    pub fn for_class(&self, class: ContainerClass) -> f64 {
        match class {
            ContainerClass::SmallTray => self.small_tray,
            ContainerClass::Box => self.box_container,
            ContainerClass::LargeBed => self.large_bed,
        }
    }

    pub fn set_for_class(&mut self, class: ContainerClass, value: f64) {
        match class {
            ContainerClass::SmallTray => self.small_tray = value,
            ContainerClass::Box => self.box_container = value,
            ContainerClass::LargeBed => self.large_bed = value,
        }
    }
}

/// Blob store circuit breaker (read once at startup)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerParameters {
    /// Consecutive failures that open the circuit (default: 5)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a trial call (default: 30)
    #[serde(default = "default_cool_down_secs")]
    pub cool_down_secs: u64,
}

/// Blob store retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryParameters {
    /// Attempts per blob operation including the first (default: 3)
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,

    /// First backoff ceiling in milliseconds (default: 200)
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff cap in milliseconds (default: 5000)
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Child (per-region) worker limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerParameters {
    /// Wall-clock limit per child attempt in seconds (default: 120)
    #[serde(default = "default_child_timeout_secs")]
    pub child_timeout_secs: u64,

    /// Attempts per child including the first (default: 2)
    #[serde(default = "default_child_max_attempts")]
    pub child_max_attempts: u32,

    /// Backoff before a child retry in milliseconds (default: 500)
    #[serde(default = "default_child_retry_delay_ms")]
    pub child_retry_delay_ms: u64,
}

impl PipelineParameters {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), String> {
        let unit = |name: &str, v: f32| -> Result<(), String> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(format!("{} must be within 0.0 - 1.0 (got {})", name, v))
            }
        };

        unit("segmentation.confidence_threshold", self.segmentation.confidence_threshold)?;
        unit("segmentation.iou_threshold", self.segmentation.iou_threshold)?;

        let d = &self.detection;
        unit("detection.confidence_threshold", d.confidence_threshold)?;
        unit("detection.iou_threshold", d.iou_threshold)?;
        unit("detection.tile_min_content_ratio", d.tile_min_content_ratio)?;
        unit("detection.merge_iou_threshold", d.merge_iou_threshold)?;
        if d.tile_size < 32 {
            return Err(format!("detection.tile_size must be >= 32 (got {})", d.tile_size));
        }
        if !(0.0..0.9).contains(&d.tile_overlap_ratio) {
            return Err(format!(
                "detection.tile_overlap_ratio must be within 0.0 - 0.9 (got {})",
                d.tile_overlap_ratio
            ));
        }

        let e = &self.estimation;
        if e.band_count == 0 {
            return Err("estimation.band_count must be >= 1".to_string());
        }
        if !(e.bias_factor > 0.0 && e.bias_factor <= 2.0) {
            return Err(format!(
                "estimation.bias_factor must be within (0.0, 2.0] (got {})",
                e.bias_factor
            ));
        }
        for class in ContainerClass::ALL {
            let area = e.default_area_per_plant.for_class(class);
            if !(area > 0.0 && area.is_finite()) {
                return Err(format!(
                    "estimation.default_area_per_plant.{} must be positive (got {})",
                    class, area
                ));
            }
        }
        if e.vegetation_hue_min_deg >= e.vegetation_hue_max_deg
            || e.vegetation_hue_min_deg < 0.0
            || e.vegetation_hue_max_deg > 360.0
        {
            return Err(
                "estimation vegetation hue window must satisfy 0 <= min < max <= 360".to_string()
            );
        }
        unit("estimation.vegetation_saturation_min", e.vegetation_saturation_min)?;
        unit("estimation.vegetation_value_min", e.vegetation_value_min)?;
        unit("estimation.adaptive_brightness_ratio", e.adaptive_brightness_ratio)?;

        if self.circuit_breaker.failure_threshold == 0 {
            return Err("circuit_breaker.failure_threshold must be >= 1".to_string());
        }
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be >= 1".to_string());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err("retry.base_delay_ms must not exceed retry.max_delay_ms".to_string());
        }
        if self.workers.child_timeout_secs == 0 {
            return Err("workers.child_timeout_secs must be >= 1".to_string());
        }
        if self.workers.child_max_attempts == 0 {
            return Err("workers.child_max_attempts must be >= 1".to_string());
        }

        Ok(())
    }
}

impl Default for SegmentationParameters {
    fn default() -> Self {
        Self {
            confidence_threshold: default_segmentation_confidence(),
            iou_threshold: default_segmentation_iou(),
        }
    }
}

impl Default for DetectionParameters {
    fn default() -> Self {
        Self {
            confidence_threshold: default_detection_confidence(),
            iou_threshold: default_detection_iou(),
            tile_size: default_tile_size(),
            tile_overlap_ratio: default_tile_overlap_ratio(),
            tile_min_content_ratio: default_tile_min_content_ratio(),
            merge_iou_threshold: default_merge_iou_threshold(),
        }
    }
}

impl Default for EstimationParameters {
    fn default() -> Self {
        Self {
            band_count: default_band_count(),
            bias_factor: default_bias_factor(),
            default_area_per_plant: ClassAreaDefaults::default(),
            vegetation_hue_min_deg: default_hue_min(),
            vegetation_hue_max_deg: default_hue_max(),
            vegetation_saturation_min: default_saturation_min(),
            vegetation_value_min: default_value_min(),
            adaptive_brightness_ratio: default_adaptive_brightness_ratio(),
            opening_radius: default_opening_radius(),
        }
    }
}

impl Default for ClassAreaDefaults {
    fn default() -> Self {
        Self {
            small_tray: default_small_tray_area(),
            box_container: default_box_area(),
            large_bed: default_large_bed_area(),
        }
    }
}

impl Default for CircuitBreakerParameters {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cool_down_secs: default_cool_down_secs(),
        }
    }
}

impl Default for RetryParameters {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for WorkerParameters {
    fn default() -> Self {
        Self {
            child_timeout_secs: default_child_timeout_secs(),
            child_max_attempts: default_child_max_attempts(),
            child_retry_delay_ms: default_child_retry_delay_ms(),
        }
    }
}

// Default value functions
fn default_segmentation_confidence() -> f32 {
    0.5
}

fn default_segmentation_iou() -> f32 {
    0.5
}

fn default_detection_confidence() -> f32 {
    0.25
}

fn default_detection_iou() -> f32 {
    0.45
}

fn default_tile_size() -> u32 {
    640
}

fn default_tile_overlap_ratio() -> f32 {
    0.25
}

fn default_tile_min_content_ratio() -> f32 {
    0.02
}

fn default_merge_iou_threshold() -> f32 {
    0.45
}

fn default_band_count() -> u32 {
    4
}

fn default_bias_factor() -> f64 {
    0.9
}

fn default_hue_min() -> f32 {
    60.0
}

fn default_hue_max() -> f32 {
    170.0
}

fn default_saturation_min() -> f32 {
    0.15
}

fn default_value_min() -> f32 {
    0.15
}

fn default_adaptive_brightness_ratio() -> f32 {
    0.6
}

fn default_opening_radius() -> u8 {
    1
}

fn default_small_tray_area() -> f64 {
    400.0
}

fn default_box_area() -> f64 {
    900.0
}

fn default_large_bed_area() -> f64 {
    600.0
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cool_down_secs() -> u64 {
    30
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_retry_max_delay_ms() -> u64 {
    5000
}

fn default_child_timeout_secs() -> u64 {
    120
}

fn default_child_max_attempts() -> u32 {
    2
}

fn default_child_retry_delay_ms() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PipelineParameters::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let params: PipelineParameters =
            serde_json::from_str(r#"{"detection": {"tile_size": 512}}"#).unwrap();
        assert_eq!(params.detection.tile_size, 512);
        assert_eq!(params.detection.tile_overlap_ratio, 0.25);
        assert_eq!(params.estimation.band_count, 4);
        assert_eq!(params.estimation.bias_factor, 0.9);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut params = PipelineParameters::default();
        params.estimation.band_count = 0;
        assert!(params.validate().unwrap_err().contains("band_count"));

        let mut params = PipelineParameters::default();
        params.detection.confidence_threshold = 1.5;
        assert!(params.validate().is_err());

        let mut params = PipelineParameters::default();
        params.estimation.default_area_per_plant.large_bed = 0.0;
        assert!(params.validate().unwrap_err().contains("large_bed"));

        let mut params = PipelineParameters::default();
        params.retry.base_delay_ms = 10_000;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_class_defaults_lookup() {
        let mut defaults = ClassAreaDefaults::default();
        defaults.set_for_class(ContainerClass::Box, 1234.0);
        assert_eq!(defaults.for_class(ContainerClass::Box), 1234.0);
        assert_eq!(defaults.for_class(ContainerClass::LargeBed), 600.0);
    }
}
