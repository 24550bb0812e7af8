//! Per-region processing outcomes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::detection::{BandEstimation, Detection};
use super::region::ContainerClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeStatus {
    type Err = gpc_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(OutcomeStatus::Success),
            "failed" => Ok(OutcomeStatus::Failed),
            other => Err(gpc_common::Error::InvalidInput(format!(
                "Unknown outcome status: {}",
                other
            ))),
        }
    }
}

/// Result of one child unit (one container region)
///
/// Detections carry global image coordinates. A failed outcome carries no
/// detections or estimations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub region_id: Uuid,
    pub region_index: u32,
    pub container_class: ContainerClass,
    pub status: OutcomeStatus,
    pub detections: Vec<Detection>,
    pub estimations: Vec<BandEstimation>,

    /// Band estimation ran for this region (large beds only)
    pub estimation_attempted: bool,

    pub error: Option<String>,

    /// Attempts used, including the final one
    pub attempts: u32,
}

impl ProcessingOutcome {
    pub fn success(
        region_id: Uuid,
        region_index: u32,
        container_class: ContainerClass,
        detections: Vec<Detection>,
        estimations: Option<Vec<BandEstimation>>,
        attempts: u32,
    ) -> Self {
        Self {
            region_id,
            region_index,
            container_class,
            status: OutcomeStatus::Success,
            detections,
            estimation_attempted: estimations.is_some(),
            estimations: estimations.unwrap_or_default(),
            error: None,
            attempts,
        }
    }

    pub fn failed(
        region_id: Uuid,
        region_index: u32,
        container_class: ContainerClass,
        error: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            region_id,
            region_index,
            container_class,
            status: OutcomeStatus::Failed,
            detections: Vec::new(),
            estimations: Vec::new(),
            estimation_attempted: false,
            error: Some(error.into()),
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn detected_count(&self) -> u64 {
        self.detections.len() as u64
    }

    pub fn estimated_count(&self) -> u64 {
        self.estimations
            .iter()
            .map(|b| u64::from(b.estimated_count))
            .sum()
    }

    /// Warning annotation for a failed outcome
    pub fn as_failure(&self) -> Option<RegionFailure> {
        if self.is_success() {
            return None;
        }
        Some(RegionFailure {
            region_id: self.region_id,
            region_index: self.region_index,
            container_class: self.container_class,
            error: self.error.clone().unwrap_or_else(|| "unknown error".to_string()),
            attempts: self.attempts,
        })
    }
}

/// Failed region recorded on the image unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionFailure {
    pub region_id: Uuid,
    pub region_index: u32,
    pub container_class: ContainerClass,
    pub error: String,
    pub attempts: u32,
}
