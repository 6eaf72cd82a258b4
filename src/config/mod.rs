//! Configuration module - server settings and persisted model configuration

pub mod settings;
pub mod store;

pub use settings::{
    EngineConfig, GenerationSettings, LoggingConfig, QueueSettings, ServerConfig, Settings,
    StorageConfig,
};
pub use store::{ConfigStore, ModelConfig, DEFAULT_MODEL_ID};
