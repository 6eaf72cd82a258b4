//! Server settings and configuration management

use crate::error::{AppError, Result};
use crate::generation::request::{DEFAULT_MAX_SIDE, DIMENSION_MULTIPLE};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an alternative settings file
pub const SETTINGS_PATH_ENV: &str = "ZIMAGE_SETTINGS";

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Where model configuration and generated images live
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_config_file")]
    pub config_file: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_config_file() -> PathBuf {
    PathBuf::from("config.json")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            config_file: default_config_file(),
            output_dir: default_output_dir(),
        }
    }
}

/// Admission control for the shared pipeline
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueSettings {
    /// Requests allowed to wait behind the one being generated
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

fn default_max_pending() -> usize {
    16
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_pending: default_max_pending(),
        }
    }
}

/// Limits applied to every generation request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationSettings {
    /// Largest accepted height or width
    #[serde(default = "default_max_side")]
    pub max_side: u32,
}

fn default_max_side() -> u32 {
    DEFAULT_MAX_SIDE
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_side: default_max_side(),
        }
    }
}

/// Options for the built-in synthetic inference engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Names of simulated accelerator devices; empty means CPU only
    #[serde(default)]
    pub accelerators: Vec<String>,
    /// Whether fp8 weight quantization is available
    #[serde(default = "default_true")]
    pub quantization: bool,
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            accelerators: Vec::new(),
            quantization: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Settings {
    /// Load settings from the configuration file and environment variables
    pub fn load() -> Result<Self> {
        let path = std::env::var(SETTINGS_PATH_ENV)
            .unwrap_or_else(|_| "config/default.toml".to_string());
        Self::load_from_path(path)
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("queue.max_pending", default_max_pending() as u64)?
            .set_default("generation.max_side", default_max_side() as u64)?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())?
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Override with environment variables, e.g. ZIMAGE__SERVER__PORT=9000
            .add_source(
                Environment::with_prefix("ZIMAGE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("engine.accelerators")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(AppError::Config(config::ConfigError::Message(
                "Server port cannot be 0".to_string(),
            )));
        }

        if self.queue.max_pending == 0 {
            return Err(AppError::Config(config::ConfigError::Message(
                "queue.max_pending must be at least 1".to_string(),
            )));
        }

        if self.generation.max_side < DIMENSION_MULTIPLE {
            return Err(AppError::Config(config::ConfigError::Message(format!(
                "generation.max_side must be at least {DIMENSION_MULTIPLE}"
            ))));
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err(AppError::Config(config::ConfigError::Message(format!(
                "Invalid logging format '{}'. Must be 'json' or 'pretty'",
                self.logging.format
            ))));
        }

        Ok(())
    }
}
