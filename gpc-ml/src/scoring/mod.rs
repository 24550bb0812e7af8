//! Neural scoring backends
//!
//! Both the container segmenter and the plant detector are driven through the
//! [`ScoringBackend`] trait. The model itself runs out of process; this crate
//! only ships pixels in and reads scored boxes back.

pub mod http;
pub mod pool;

use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpScoringBackend;
pub use pool::{ModelPool, PooledModel};

/// Scoring backend errors
#[derive(Debug, Error)]
pub enum ScoringError {
    /// Backend unreachable or overloaded
    #[error("Scoring backend unavailable: {0}")]
    Unavailable(String),

    /// Backend refused the input
    #[error("Invalid scoring input: {0}")]
    InvalidInput(String),

    /// Model ran but failed
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Response could not be parsed
    #[error("Malformed scoring response: {0}")]
    Decode(String),
}

/// One raw scored box as returned by a model, in pixels of the scored image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Model label id
    pub class_id: u32,

    pub confidence: f32,

    /// `[x_min, y_min, x_max, y_max]`
    pub bbox: [f32; 4],

    /// Segmentation outline, when the model produces one
    #[serde(default)]
    pub polygon: Option<Vec<[f32; 2]>>,
}

impl RawDetection {
    /// Box with positive width and height
    pub fn is_degenerate(&self) -> bool {
        let [x0, y0, x1, y1] = self.bbox;
        !(x1 > x0 && y1 > y0) || self.bbox.iter().any(|v| !v.is_finite())
    }
}

/// Scores an RGB image and returns boxes above the given thresholds
#[async_trait]
pub trait ScoringBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    async fn score(
        &self,
        image: &RgbImage,
        confidence_threshold: f32,
        iou_threshold: f32,
    ) -> Result<Vec<RawDetection>, ScoringError>;
}
