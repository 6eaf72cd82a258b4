//! Persisted model configuration (`config.json`)
//!
//! The store keeps an immutable snapshot behind a lock and swaps in a new
//! `Arc` on every change, so readers never see a partially applied update.
//! Read and write failures are logged and absorbed: the server keeps
//! serving with defaults.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_MODEL_ID: &str = "Tongyi-MAI/Z-Image-Turbo";

/// Runtime model configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModelConfig {
    /// Model cache directory; empty means the engine default
    #[serde(default)]
    pub cache_dir: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Accelerator index; out-of-range values fall back to 0 at load time
    #[serde(default = "default_gpu_device")]
    pub gpu_device: i64,
    #[serde(default = "default_true")]
    pub cpu_offload: bool,
    #[serde(default = "default_true")]
    pub fp8_quantization: bool,
}

fn default_model_id() -> String {
    DEFAULT_MODEL_ID.to_string()
}

fn default_gpu_device() -> i64 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            cache_dir: String::new(),
            model_id: default_model_id(),
            gpu_device: default_gpu_device(),
            cpu_offload: true,
            fp8_quantization: true,
        }
    }
}

impl ModelConfig {
    /// Cache directory as a path, `None` when unset
    pub fn cache_path(&self) -> Option<&Path> {
        if self.cache_dir.is_empty() {
            None
        } else {
            Some(Path::new(&self.cache_dir))
        }
    }
}

/// File-backed configuration store
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Arc<ModelConfig>>,
}

impl ConfigStore {
    /// Open the store, loading the persisted configuration or defaults
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let initial = load(&path);
        Self {
            path,
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the persisted configuration without touching the snapshot
    pub fn load(&self) -> ModelConfig {
        load(&self.path)
    }

    /// Current configuration snapshot
    pub fn snapshot(&self) -> Arc<ModelConfig> {
        self.current.read().clone()
    }

    /// Swap in a new configuration and persist it
    pub fn replace(&self, config: ModelConfig) -> Arc<ModelConfig> {
        let mut current = self.current.write();
        let next = Arc::new(config);
        *current = next.clone();
        // Persisting under the write lock keeps file order equal to swap order
        self.save(&next);
        next
    }

    /// Reset `gpu_device` to 0 if it still holds `stale`.
    ///
    /// Returns false when a concurrent settings update already changed it.
    pub fn correct_gpu_device(&self, stale: i64) -> bool {
        let mut current = self.current.write();
        if current.gpu_device != stale {
            return false;
        }
        let mut next = (**current).clone();
        next.gpu_device = 0;
        let next = Arc::new(next);
        *current = next.clone();
        self.save(&next);
        true
    }

    /// Write the configuration atomically; failures are logged
    pub fn save(&self, config: &ModelConfig) {
        if let Err(e) = save(&self.path, config) {
            warn!(path = ?self.path, error = %e, "Failed to save model configuration");
        } else {
            debug!(path = ?self.path, "Saved model configuration");
        }
    }
}

fn load(path: &Path) -> ModelConfig {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = ?path, "No model configuration found, using defaults");
            return ModelConfig::default();
        }
        Err(e) => {
            warn!(path = ?path, error = %e, "Error loading model configuration, using defaults");
            return ModelConfig::default();
        }
    };

    match serde_json::from_str::<ModelConfig>(&raw) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = ?path, error = %e, "Error parsing model configuration, using defaults");
            ModelConfig::default()
        }
    }
}

fn save(path: &Path, config: &ModelConfig) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, config)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
