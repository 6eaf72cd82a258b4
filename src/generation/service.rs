//! Protocol-agnostic generation routine shared by both front-ends

use chrono::Local;
use std::sync::Arc;
use tracing::info;

use crate::config::ConfigStore;
use crate::engine::{Device, InferenceParams, SeedSource};
use crate::error::{AppError, Result};
use crate::generation::encoding;
use crate::generation::output::OutputStore;
use crate::generation::request::{GenerationRequest, GenerationResult, DEFAULT_MAX_SIDE};
use crate::pipeline::{device, PipelineManager};

pub struct GenerationService {
    pipelines: Arc<PipelineManager>,
    config: Arc<ConfigStore>,
    output: OutputStore,
    max_side: u32,
}

impl GenerationService {
    pub fn new(pipelines: Arc<PipelineManager>, config: Arc<ConfigStore>, output: OutputStore) -> Self {
        Self {
            pipelines,
            config,
            output,
            max_side: DEFAULT_MAX_SIDE,
        }
    }

    /// Cap each image side at `max_side`
    pub fn with_max_side(mut self, max_side: u32) -> Self {
        self.max_side = max_side;
        self
    }

    pub fn pipelines(&self) -> &Arc<PipelineManager> {
        &self.pipelines
    }

    pub fn output(&self) -> &OutputStore {
        &self.output
    }

    /// Validate, run inference, persist and encode. Blocking.
    pub fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        request.validate(self.max_side)?;

        let seed = request.explicit_seed().map(|seed| SeedSource {
            device: self.generator_device(),
            seed,
        });

        let pipeline = self.pipelines.acquire()?;
        info!(
            prompt = %request.prompt,
            height = request.height,
            width = request.width,
            steps = request.steps,
            seed = request.seed,
            "Generating image"
        );
        let image = pipeline
            .generate(
                &InferenceParams {
                    prompt: &request.prompt,
                    height: request.height,
                    width: request.width,
                    steps: request.steps,
                    guidance_scale: request.guidance_scale,
                },
                seed.as_ref(),
            )
            .map_err(|e| AppError::Inference(format!("{e:#}")))?;
        drop(pipeline);

        let (width, height) = (image.width(), image.height());
        let png = encoding::encode_png(&image)?;
        drop(image);

        let created_at = Local::now();
        let (id, path) = self.output.save_png(&created_at, &png)?;

        Ok(GenerationResult {
            id,
            created_at,
            path,
            width,
            height,
            image_base64: encoding::encode(&png),
        })
    }

    /// Device the seeded random source is bound to, resolved with the same
    /// fallback as pipeline construction but without persisting anything.
    fn generator_device(&self) -> Device {
        let count = self.pipelines.engine().devices().len();
        if count == 0 {
            return Device::Cpu;
        }
        let (ordinal, _) = device::resolve_ordinal(count, self.config.snapshot().gpu_device);
        Device::Accelerator(ordinal)
    }
}
