//! Image unit processing pipeline
//!
//! One parent task per photo segments it into container regions, fans out one
//! child per region, waits for every child and aggregates their outcomes into
//! the unit's final status and counts.

pub mod aggregator;
pub mod orchestrator;
pub mod region_worker;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::blob::BlobError;
use crate::models::{ContainerClass, ImageStatus};
use crate::vision::SegmentationError;

pub use aggregator::{aggregate, Aggregation};
pub use orchestrator::PipelineOrchestrator;
pub use region_worker::{RegionContext, RegionError};

/// Progress events broadcast while units are processed
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    UnitStarted {
        image_unit_id: Uuid,
        attempt: u32,
    },

    RegionsSegmented {
        image_unit_id: Uuid,
        region_count: usize,
    },

    RegionCompleted {
        image_unit_id: Uuid,
        region_index: u32,
        container_class: ContainerClass,
        detected_count: u64,
        estimated_count: u64,
    },

    RegionFailed {
        image_unit_id: Uuid,
        region_index: u32,
        container_class: ContainerClass,
        error: String,
        attempts: u32,
    },

    UnitFinished {
        image_unit_id: Uuid,
        status: ImageStatus,
        detected_count: u64,
        estimated_count: u64,
        failure_reason: Option<String>,
    },

    VisualizationUploaded {
        image_unit_id: Uuid,
        key: String,
    },
}

/// Errors that end an image unit (or reject the request) at orchestrator level
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Image unit not found: {0}")]
    NotFound(Uuid),

    #[error("Image unit {id} was already dispatched (status {status})")]
    AlreadyDispatched { id: Uuid, status: ImageStatus },

    #[error("Image unit {id} is still {status}; only finished units can be reprocessed")]
    NotTerminal { id: Uuid, status: ImageStatus },

    #[error("Source image unavailable: {0}")]
    Blob(#[from] BlobError),

    #[error("Source image unreadable: {0}")]
    Decode(String),

    #[error("Segmentation failed: {0}")]
    Segmentation(#[from] SegmentationError),

    #[error("Persisting results failed: {0}")]
    Persistence(gpc_common::Error),

    #[error(transparent)]
    Database(#[from] gpc_common::Error),
}
