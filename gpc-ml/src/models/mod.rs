//! Data models for the processing pipeline

pub mod detection;
pub mod image_unit;
pub mod outcome;
pub mod parameters;
pub mod region;

pub use detection::{BandEstimation, CalibrationSource, Detection, DetectionStrategy};
pub use image_unit::{ImageStatus, ImageUnit, StatusTransition};
pub use outcome::{OutcomeStatus, ProcessingOutcome, RegionFailure};
pub use parameters::{ClassAreaDefaults, PipelineParameters};
pub use region::{ContainerClass, ContainerRegion, NormalizedBox};
