//! Container class → detection strategy

use crate::models::{ContainerClass, DetectionStrategy};

/// Strategy for a container class. Pure and total.
pub fn route(class: ContainerClass) -> DetectionStrategy {
    match class {
        ContainerClass::LargeBed => DetectionStrategy::Tiled,
        ContainerClass::SmallTray | ContainerClass::Box => DetectionStrategy::Direct,
    }
}

/// Band estimation runs for large beds only
pub fn estimation_applies(class: ContainerClass) -> bool {
    class == ContainerClass::LargeBed
}
