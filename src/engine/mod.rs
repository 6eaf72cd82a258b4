//! Inference engine contract
//!
//! The diffusion backend is an external collaborator. The server only needs
//! to enumerate devices, load a pipeline, compress and place its weights, and
//! run one blocking inference call at a time.

pub mod synthetic;

use image::DynamicImage;
use serde::Serialize;
use std::fmt;
use std::path::Path;

pub use synthetic::SyntheticEngine;

/// Compute device a pipeline executes on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Accelerator(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerator(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

/// Floating point precision used when loading weights
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precision {
    F32,
    /// Reduced precision for accelerator execution
    BF16,
}

/// Pipeline sub-modules that can be quantized
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    Transformer,
    TextEncoder,
    Vae,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::Transformer, Component::TextEncoder, Component::Vae];
}

/// Accelerator reported by the engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub id: usize,
    pub name: String,
}

/// What to load and at which precision
#[derive(Clone, Debug)]
pub struct LoadRequest<'a> {
    pub model_id: &'a str,
    pub cache_dir: Option<&'a Path>,
    pub precision: Precision,
}

/// Parameters of one inference call
#[derive(Clone, Debug)]
pub struct InferenceParams<'a> {
    pub prompt: &'a str,
    pub height: u32,
    pub width: u32,
    pub steps: u32,
    pub guidance_scale: f32,
}

/// Deterministic random source bound to a device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeedSource {
    pub device: Device,
    pub seed: u64,
}

/// An inference backend able to build pipelines
pub trait InferenceEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Accelerator devices present; empty means CPU only
    fn devices(&self) -> Vec<DeviceInfo>;

    /// Whether fp8 weight quantization is available
    fn supports_quantization(&self) -> bool;

    /// Load a pipeline with full weights. Blocking and potentially slow.
    fn load(&self, request: &LoadRequest<'_>) -> anyhow::Result<Box<dyn DiffusionPipeline>>;
}

/// A loaded diffusion pipeline
pub trait DiffusionPipeline: Send + Sync {
    fn has_component(&self, component: Component) -> bool;

    /// Quantize the component's weights to fp8 and freeze them. There is no
    /// way back to full precision for this instance.
    fn quantize(&mut self, component: Component) -> anyhow::Result<()>;

    /// Keep weights in host memory and stage sub-modules onto the
    /// accelerator only while they execute.
    fn enable_cpu_offload(&mut self, ordinal: usize) -> anyhow::Result<()>;

    /// Place the whole pipeline on one device
    fn to_device(&mut self, device: Device) -> anyhow::Result<()>;

    /// Run inference. Blocking; must not be called on an async executor thread.
    fn generate(
        &self,
        params: &InferenceParams<'_>,
        seed: Option<&SeedSource>,
    ) -> anyhow::Result<DynamicImage>;
}
