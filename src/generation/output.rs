//! Durable storage for generated images

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;

/// Writes generated PNGs under one output directory
pub struct OutputStore {
    output_dir: PathBuf,
}

impl OutputStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Create the output directory if it does not exist yet
    pub fn ensure_output_dir(&self) -> Result<()> {
        if !self.output_dir.exists() {
            fs::create_dir_all(&self.output_dir)?;
            debug!(path = ?self.output_dir, "Created output directory");
        }
        Ok(())
    }

    /// Save PNG bytes as `{timestamp}_{id}.png`, returning the id and path
    pub fn save_png(&self, created_at: &DateTime<Local>, png: &[u8]) -> Result<(String, PathBuf)> {
        self.ensure_output_dir()?;

        let id = short_id();
        let file_path = self.output_dir.join(file_name(created_at, &id));
        fs::write(&file_path, png)?;

        info!(path = ?file_path, size = png.len(), "Image saved");
        Ok((id, file_path))
    }
}

/// First eight hex characters of a random UUID
fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Sortable, collision resistant output file name
pub fn file_name(created_at: &DateTime<Local>, id: &str) -> String {
    format!("{}_{}.png", created_at.format("%Y%m%d_%H%M%S"), id)
}
