//! Device and precision resolution

use crate::engine::{Device, DeviceInfo, Precision};

/// Outcome of resolving the configured device against what is present
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DevicePlan {
    pub device: Device,
    pub precision: Precision,
    /// Configured index that was out of range and replaced by 0
    pub fallback_from: Option<i64>,
}

/// Map a configured index onto `[0, count)`, falling back to 0.
///
/// Returns the ordinal and whether the fallback was taken. `count` must be
/// non-zero.
pub fn resolve_ordinal(count: usize, configured: i64) -> (usize, bool) {
    match usize::try_from(configured) {
        Ok(ordinal) if ordinal < count => (ordinal, false),
        _ => (0, true),
    }
}

/// Pick the execution device and weight precision.
///
/// CPU with f32 when no accelerator exists, otherwise the configured
/// accelerator (or 0) with bf16.
pub fn resolve(devices: &[DeviceInfo], configured: i64) -> DevicePlan {
    if devices.is_empty() {
        return DevicePlan {
            device: Device::Cpu,
            precision: Precision::F32,
            fallback_from: None,
        };
    }

    let (ordinal, fell_back) = resolve_ordinal(devices.len(), configured);
    DevicePlan {
        device: Device::Accelerator(ordinal),
        precision: Precision::BF16,
        fallback_from: fell_back.then_some(configured),
    }
}
