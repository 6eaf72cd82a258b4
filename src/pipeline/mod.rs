//! Pipeline module - device resolution and the lazily loaded pipeline

pub mod device;
pub mod manager;

pub use device::DevicePlan;
pub use manager::{PipelineHandle, PipelineManager};
