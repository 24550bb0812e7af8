//! Container regions found by the segmenter

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Container class assigned by the segmentation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerClass {
    SmallTray,
    Box,
    LargeBed,
}

impl ContainerClass {
    pub const ALL: [ContainerClass; 3] = [
        ContainerClass::SmallTray,
        ContainerClass::Box,
        ContainerClass::LargeBed,
    ];

    /// Map a segmentation model label id (0 = small tray, 1 = box, 2 = large bed)
    pub fn from_label_id(label_id: u32) -> Option<Self> {
        match label_id {
            0 => Some(ContainerClass::SmallTray),
            1 => Some(ContainerClass::Box),
            2 => Some(ContainerClass::LargeBed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerClass::SmallTray => "small_tray",
            ContainerClass::Box => "box",
            ContainerClass::LargeBed => "large_bed",
        }
    }
}

impl fmt::Display for ContainerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerClass {
    type Err = gpc_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "small_tray" => Ok(ContainerClass::SmallTray),
            "box" => Ok(ContainerClass::Box),
            "large_bed" => Ok(ContainerClass::LargeBed),
            other => Err(gpc_common::Error::InvalidInput(format!(
                "Unknown container class: {}",
                other
            ))),
        }
    }
}

/// Axis-aligned box in normalized image coordinates (0.0 - 1.0, top-left origin)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedBox {
    /// Build from pixel corners, clamping to the image
    pub fn from_pixel_corners(corners: [f32; 4], image_width: u32, image_height: u32) -> Self {
        let w = image_width.max(1) as f32;
        let h = image_height.max(1) as f32;
        let x0 = (corners[0] / w).clamp(0.0, 1.0);
        let y0 = (corners[1] / h).clamp(0.0, 1.0);
        let x1 = (corners[2] / w).clamp(0.0, 1.0);
        let y1 = (corners[3] / h).clamp(0.0, 1.0);

        Self {
            x: x0.min(x1),
            y: y0.min(y1),
            width: (x1 - x0).abs(),
            height: (y1 - y0).abs(),
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// A detected container within one image unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRegion {
    pub id: Uuid,
    pub image_unit_id: Uuid,

    /// Stable index within the unit (segmenter output order)
    pub region_index: u32,

    pub container_class: ContainerClass,

    pub bbox: NormalizedBox,

    /// Outline in normalized coordinates; empty when the model gave only a box
    pub polygon: Vec<[f32; 2]>,

    /// Segmentation confidence
    pub confidence: f32,
}
