//! Lazily constructed, process-wide inference pipeline

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ConfigStore;
use crate::engine::{Component, Device, DiffusionPipeline, InferenceEngine, LoadRequest};
use crate::error::{AppError, Result};
use crate::pipeline::device;

/// Shared handle to the loaded pipeline
pub type PipelineHandle = Arc<dyn DiffusionPipeline>;

/// Owner of the single pipeline instance.
///
/// `acquire` builds the pipeline on first use from the current configuration
/// and caches it; configuration changes only take effect after `invalidate`.
/// Construction runs with the slot locked, so an invalidation or a second
/// acquire waits for it instead of seeing a half-built pipeline.
pub struct PipelineManager {
    engine: Arc<dyn InferenceEngine>,
    config: Arc<ConfigStore>,
    slot: Mutex<Option<PipelineHandle>>,
    constructions: AtomicU64,
}

impl PipelineManager {
    pub fn new(engine: Arc<dyn InferenceEngine>, config: Arc<ConfigStore>) -> Self {
        Self {
            engine,
            config,
            slot: Mutex::new(None),
            constructions: AtomicU64::new(0),
        }
    }

    pub fn engine(&self) -> &Arc<dyn InferenceEngine> {
        &self.engine
    }

    /// Return the cached pipeline, constructing it if absent. Blocking.
    pub fn acquire(&self) -> Result<PipelineHandle> {
        let mut slot = self.slot.lock();
        if let Some(pipeline) = slot.as_ref() {
            return Ok(pipeline.clone());
        }

        let pipeline = self.construct().map_err(|e| {
            warn!(error = %e, "Error loading model");
            e
        })?;
        *slot = Some(pipeline.clone());
        Ok(pipeline)
    }

    /// Drop the current pipeline; the next `acquire` rebuilds it
    pub fn invalidate(&self) {
        if self.slot.lock().take().is_some() {
            info!("Pipeline invalidated, will reload on next generation");
        }
    }

    /// Whether a pipeline is installed. Reports false while one is being built.
    pub fn is_loaded(&self) -> bool {
        self.slot
            .try_lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Number of successful constructions so far
    pub fn constructions(&self) -> u64 {
        self.constructions.load(Ordering::Relaxed)
    }

    fn construct(&self) -> Result<PipelineHandle> {
        let config = self.config.snapshot();
        info!(model_id = %config.model_id, engine = self.engine.name(), "Loading model");
        if let Some(cache_dir) = config.cache_path() {
            info!(cache_dir = ?cache_dir, "Using cache directory");
        }

        let devices = self.engine.devices();
        if devices.is_empty() {
            info!("No accelerator devices found, falling back to CPU");
        }
        let plan = device::resolve(&devices, config.gpu_device);
        if let Some(configured) = plan.fallback_from {
            let available: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
            warn!(
                configured,
                available = ?available,
                "Configured GPU is not available, falling back to GPU 0"
            );
            self.config.correct_gpu_device(configured);
        }

        let mut pipeline = self
            .engine
            .load(&LoadRequest {
                model_id: &config.model_id,
                cache_dir: config.cache_path(),
                precision: plan.precision,
            })
            .map_err(|e| AppError::PipelineConstruction(format!("{e:#}")))?;

        if config.fp8_quantization {
            if self.engine.supports_quantization() {
                info!("Quantization enabled, quantizing weights to fp8");
                for component in Component::ALL {
                    if pipeline.has_component(component) {
                        pipeline.quantize(component).map_err(|e| {
                            AppError::PipelineConstruction(format!(
                                "quantizing {component:?}: {e:#}"
                            ))
                        })?;
                    }
                }
            } else {
                warn!("fp8 quantization requested but unavailable, loading unquantized");
            }
        }

        let placed = match plan.device {
            Device::Accelerator(ordinal) if config.cpu_offload => {
                info!(ordinal, "Enabling CPU offload");
                pipeline.enable_cpu_offload(ordinal)
            }
            device => pipeline.to_device(device),
        };
        placed.map_err(|e| AppError::PipelineConstruction(format!("placing pipeline: {e:#}")))?;

        self.constructions.fetch_add(1, Ordering::Relaxed);
        info!(device = %plan.device, precision = ?plan.precision, "Model loaded");
        Ok(Arc::from(pipeline))
    }
}
