//! Text-to-image serving
//!
//! One lazily loaded diffusion pipeline served over a JSON HTTP API and an
//! MCP tool server on the same listener. Generation from either surface is
//! serialized through a single queue onto a blocking worker.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod generation;
pub mod mcp;
pub mod pipeline;
pub mod queue;

pub use error::{AppError, Result};

use std::sync::Arc;

use crate::config::{ConfigStore, Settings};
use crate::engine::InferenceEngine;
use crate::generation::{GenerationService, OutputStore};
use crate::pipeline::PipelineManager;
use crate::queue::{GenerationQueue, QueueConfig};

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<Settings>,
    pub config_store: Arc<ConfigStore>,
    pub pipelines: Arc<PipelineManager>,
    pub generation: Arc<GenerationService>,
    pub queue: Arc<GenerationQueue>,
}

impl AppState {
    /// Wire the components together. Spawns the queue worker, so this must
    /// run inside a Tokio runtime.
    pub fn new(settings: Settings, engine: Arc<dyn InferenceEngine>) -> Self {
        let config_store = Arc::new(ConfigStore::open(&settings.storage.config_file));
        let pipelines = Arc::new(PipelineManager::new(engine, config_store.clone()));
        let generation = Arc::new(
            GenerationService::new(
                pipelines.clone(),
                config_store.clone(),
                OutputStore::new(&settings.storage.output_dir),
            )
            .with_max_side(settings.generation.max_side),
        );
        let queue = Arc::new(GenerationQueue::with_config(
            generation.clone(),
            QueueConfig::from(&settings.queue),
        ));

        Self {
            settings: Arc::new(settings),
            config_store,
            pipelines,
            generation,
            queue,
        }
    }
}
