//! Deterministic procedural engine
//!
//! Renders gradient-and-blob images instead of running a diffusion model.
//! Output is a pure function of the prompt, size, steps, guidance and seed,
//! which makes it suitable for CPU-only deployments and for tests.

use anyhow::{bail, Result};
use image::{DynamicImage, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::debug;

use crate::config::EngineConfig;
use crate::engine::{
    Component, Device, DeviceInfo, DiffusionPipeline, InferenceEngine, InferenceParams,
    LoadRequest, Precision, SeedSource,
};

/// Upper bound on blobs drawn, whatever the step count
const MAX_BLOBS: u32 = 32;

/// Largest side the renderer will allocate a buffer for
pub const MAX_RENDER_SIDE: u32 = 8192;

pub struct SyntheticEngine {
    accelerators: Vec<String>,
    quantization: bool,
}

impl SyntheticEngine {
    /// CPU-only engine with quantization available
    pub fn new() -> Self {
        Self {
            accelerators: Vec::new(),
            quantization: true,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            accelerators: config.accelerators.clone(),
            quantization: config.quantization,
        }
    }

    pub fn with_accelerators(mut self, names: Vec<String>) -> Self {
        self.accelerators = names;
        self
    }
}

impl Default for SyntheticEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceEngine for SyntheticEngine {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        self.accelerators
            .iter()
            .enumerate()
            .map(|(id, name)| DeviceInfo {
                id,
                name: name.clone(),
            })
            .collect()
    }

    fn supports_quantization(&self) -> bool {
        self.quantization
    }

    fn load(&self, request: &LoadRequest<'_>) -> Result<Box<dyn DiffusionPipeline>> {
        if request.model_id.trim().is_empty() {
            bail!("model id is empty");
        }
        debug!(
            model_id = request.model_id,
            cache_dir = ?request.cache_dir,
            precision = ?request.precision,
            "Loading synthetic pipeline"
        );

        Ok(Box::new(SyntheticPipeline {
            device_count: self.accelerators.len(),
            precision: request.precision,
            quantized: Vec::new(),
            placement: None,
        }))
    }
}

/// Where the pipeline weights live
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    Resident(Device),
    Offloaded { ordinal: usize },
}

impl Placement {
    fn execution_device(&self) -> Device {
        match self {
            Placement::Resident(device) => *device,
            Placement::Offloaded { ordinal } => Device::Accelerator(*ordinal),
        }
    }
}

pub struct SyntheticPipeline {
    device_count: usize,
    precision: Precision,
    quantized: Vec<Component>,
    placement: Option<Placement>,
}

impl SyntheticPipeline {
    pub fn placement(&self) -> Option<Placement> {
        self.placement
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn is_quantized(&self, component: Component) -> bool {
        self.quantized.contains(&component)
    }

    fn check_ordinal(&self, ordinal: usize) -> Result<()> {
        if ordinal >= self.device_count {
            bail!(
                "accelerator {ordinal} not available ({} present)",
                self.device_count
            );
        }
        Ok(())
    }
}

impl DiffusionPipeline for SyntheticPipeline {
    fn has_component(&self, _component: Component) -> bool {
        true
    }

    fn quantize(&mut self, component: Component) -> Result<()> {
        if self.placement.is_some() {
            bail!("cannot quantize {component:?} after placement");
        }
        if !self.quantized.contains(&component) {
            self.quantized.push(component);
        }
        Ok(())
    }

    fn enable_cpu_offload(&mut self, ordinal: usize) -> Result<()> {
        self.check_ordinal(ordinal)?;
        self.placement = Some(Placement::Offloaded { ordinal });
        Ok(())
    }

    fn to_device(&mut self, device: Device) -> Result<()> {
        if let Device::Accelerator(ordinal) = device {
            self.check_ordinal(ordinal)?;
        }
        self.placement = Some(Placement::Resident(device));
        Ok(())
    }

    fn generate(
        &self,
        params: &InferenceParams<'_>,
        seed: Option<&SeedSource>,
    ) -> Result<DynamicImage> {
        let Some(placement) = self.placement else {
            bail!("pipeline has not been placed on a device");
        };
        if params.width == 0 || params.height == 0 {
            bail!("image dimensions must be positive");
        }
        if params.width > MAX_RENDER_SIDE || params.height > MAX_RENDER_SIDE {
            bail!(
                "image dimensions {}x{} exceed the renderer limit of {MAX_RENDER_SIDE}",
                params.height,
                params.width
            );
        }

        let mut rng = match seed {
            Some(source) => {
                StdRng::seed_from_u64(source.seed ^ device_salt(source.device) ^ prompt_hash(params))
            }
            None => StdRng::from_entropy(),
        };
        debug!(
            device = %placement.execution_device(),
            seeded = seed.is_some(),
            "Rendering synthetic image"
        );

        Ok(DynamicImage::ImageRgb8(render(params, &mut rng)))
    }
}

fn device_salt(device: Device) -> u64 {
    match device {
        Device::Cpu => 0,
        Device::Accelerator(ordinal) => (ordinal as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15),
    }
}

fn prompt_hash(params: &InferenceParams<'_>) -> u64 {
    let mut hasher = DefaultHasher::new();
    params.prompt.hash(&mut hasher);
    params.steps.hash(&mut hasher);
    params.guidance_scale.to_bits().hash(&mut hasher);
    hasher.finish()
}

struct Blob {
    cx: f32,
    cy: f32,
    radius: f32,
    color: [f32; 3],
}

fn render(params: &InferenceParams<'_>, rng: &mut StdRng) -> RgbImage {
    let (width, height) = (params.width, params.height);
    let top: [f32; 3] = [rng.gen(), rng.gen(), rng.gen()];
    let bottom: [f32; 3] = [rng.gen(), rng.gen(), rng.gen()];
    let contrast = 1.0 + params.guidance_scale.clamp(0.0, 20.0) / 10.0;

    let blobs: Vec<Blob> = (0..params.steps.min(MAX_BLOBS))
        .map(|_| Blob {
            cx: rng.gen_range(0.0..width as f32),
            cy: rng.gen_range(0.0..height as f32),
            radius: rng.gen_range(0.05f32..0.3) * width.min(height) as f32,
            color: [rng.gen(), rng.gen(), rng.gen()],
        })
        .collect();

    RgbImage::from_fn(width, height, |x, y| {
        let t = y as f32 / height.max(1) as f32;
        let mut px = [0.0f32; 3];
        for c in 0..3 {
            px[c] = top[c] * (1.0 - t) + bottom[c] * t;
        }
        for blob in &blobs {
            let dx = x as f32 - blob.cx;
            let dy = y as f32 - blob.cy;
            let d2 = (dx * dx + dy * dy) / (blob.radius * blob.radius);
            if d2 < 1.0 {
                let w = (1.0 - d2) * 0.6;
                for c in 0..3 {
                    px[c] = px[c] * (1.0 - w) + blob.color[c] * w;
                }
            }
        }
        let channel = |v: f32| (((v - 0.5) * contrast + 0.5).clamp(0.0, 1.0) * 255.0) as u8;
        Rgb([channel(px[0]), channel(px[1]), channel(px[2])])
    })
}
