//! HTTP status surface for gpc-ml
//!
//! Read-only views of image units for a polling layer, plus the few writes an
//! operator needs: dispatch, reprocess, parameters and calibration samples.

pub mod calibration;
pub mod circuit;
pub mod health;
pub mod images;
pub mod parameters;

pub use calibration::calibration_routes;
pub use circuit::circuit_routes;
pub use health::{health_routes, track_last_error};
pub use images::image_routes;
pub use parameters::parameter_routes;
