//! Plant detections and band estimations

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Detection strategy chosen per container class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    /// Overlapping tiles scored independently, candidates merged
    Tiled,
    /// Whole region crop scored in one pass
    Direct,
}

impl DetectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionStrategy::Tiled => "tiled",
            DetectionStrategy::Direct => "direct",
        }
    }
}

impl fmt::Display for DetectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionStrategy {
    type Err = gpc_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tiled" => Ok(DetectionStrategy::Tiled),
            "direct" => Ok(DetectionStrategy::Direct),
            other => Err(gpc_common::Error::InvalidInput(format!(
                "Unknown detection strategy: {}",
                other
            ))),
        }
    }
}

/// One detected plant
///
/// Coordinates are pixels. Inside the detectors they are local to the crop
/// being scored; once a region worker returns they are global to the full
/// source image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: Uuid,
    pub region_id: Uuid,
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub strategy: DetectionStrategy,
}

impl Detection {
    /// Build from corner coordinates `[x_min, y_min, x_max, y_max]`
    pub fn from_corners(
        region_id: Uuid,
        corners: [f32; 4],
        confidence: f32,
        strategy: DetectionStrategy,
    ) -> Self {
        let [x0, y0, x1, y1] = corners;
        Self {
            id: Uuid::new_v4(),
            region_id,
            center_x: (x0 + x1) / 2.0,
            center_y: (y0 + y1) / 2.0,
            width: (x1 - x0).abs(),
            height: (y1 - y0).abs(),
            confidence,
            strategy,
        }
    }

    /// Corner coordinates `[x_min, y_min, x_max, y_max]`
    pub fn corners(&self) -> [f32; 4] {
        [
            self.center_x - self.width / 2.0,
            self.center_y - self.height / 2.0,
            self.center_x + self.width / 2.0,
            self.center_y + self.height / 2.0,
        ]
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Shift by a pixel offset
    pub fn translated(mut self, dx: f32, dy: f32) -> Self {
        self.center_x += dx;
        self.center_y += dy;
        self
    }
}

/// Where a band's area-per-plant figure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationSource {
    /// Mean box area of detections centred in the band
    Detections,
    /// Container-class default (no detections in the band)
    ClassDefault,
}

impl CalibrationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalibrationSource::Detections => "detections",
            CalibrationSource::ClassDefault => "class_default",
        }
    }
}

impl FromStr for CalibrationSource {
    type Err = gpc_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detections" => Ok(CalibrationSource::Detections),
            "class_default" => Ok(CalibrationSource::ClassDefault),
            other => Err(gpc_common::Error::InvalidInput(format!(
                "Unknown calibration source: {}",
                other
            ))),
        }
    }
}

/// Estimated count for one horizontal band of a large-bed region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandEstimation {
    pub region_id: Uuid,
    pub band_index: u32,

    /// Band rows in region-local pixels, `[top, bottom)`
    pub band_top: u32,
    pub band_bottom: u32,

    /// Plantable residual area in the band
    pub residual_area_px: u64,

    /// Area one plant is assumed to occupy
    pub area_per_plant_px: f64,

    pub calibration: CalibrationSource,

    pub estimated_count: u32,

    pub confidence: f32,
}
