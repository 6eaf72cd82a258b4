//! Generation request and result types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, Result};

/// Seed value meaning "no explicit random source"
pub const UNSEEDED: i64 = -1;

/// Image side lengths must be multiples of this
pub const DIMENSION_MULTIPLE: u32 = 16;

/// Default ceiling for either image side
pub const DEFAULT_MAX_SIDE: u32 = 2048;

/// Request to generate one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The prompt to generate the image from
    pub prompt: String,

    #[serde(default = "default_side")]
    pub height: u32,

    #[serde(default = "default_side")]
    pub width: u32,

    /// Number of inference steps
    #[serde(default = "default_steps")]
    pub steps: u32,

    #[serde(default)]
    pub guidance_scale: f32,

    /// Random seed for reproducibility; -1 for a random run
    #[serde(default = "default_seed")]
    pub seed: i64,
}

fn default_side() -> u32 {
    1024
}

fn default_steps() -> u32 {
    8
}

fn default_seed() -> i64 {
    UNSEEDED
}

impl GenerationRequest {
    /// Request with default parameters for `prompt`
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            height: default_side(),
            width: default_side(),
            steps: default_steps(),
            guidance_scale: 0.0,
            seed: UNSEEDED,
        }
    }

    pub fn with_size(mut self, height: u32, width: u32) -> Self {
        self.height = height;
        self.width = width;
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_guidance_scale(mut self, guidance_scale: f32) -> Self {
        self.guidance_scale = guidance_scale;
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    /// Seed as the engine's unsigned seed, `None` when unseeded.
    ///
    /// Negative seeds other than the sentinel keep their bit pattern.
    pub fn explicit_seed(&self) -> Option<u64> {
        (self.seed != UNSEEDED).then_some(self.seed as u64)
    }

    /// Check the request before any pipeline work happens. Neither side may
    /// exceed `max_side`.
    pub fn validate(&self, max_side: u32) -> Result<()> {
        if self.height % DIMENSION_MULTIPLE != 0 || self.width % DIMENSION_MULTIPLE != 0 {
            return Err(AppError::InvalidRequest(format!(
                "Height and Width must be divisible by {DIMENSION_MULTIPLE} (got {}x{}).",
                self.height, self.width
            )));
        }
        if self.height == 0 || self.width == 0 {
            return Err(AppError::InvalidRequest(
                "Height and Width must be positive.".to_string(),
            ));
        }
        if self.height > max_side || self.width > max_side {
            return Err(AppError::InvalidRequest(format!(
                "Height and Width must be at most {max_side} (got {}x{}).",
                self.height, self.width
            )));
        }
        if self.prompt.trim().is_empty() {
            return Err(AppError::InvalidRequest("Prompt must not be empty.".to_string()));
        }
        if self.steps == 0 {
            return Err(AppError::InvalidRequest(
                "Steps must be at least 1.".to_string(),
            ));
        }
        if !self.guidance_scale.is_finite() || self.guidance_scale < 0.0 {
            return Err(AppError::InvalidRequest(format!(
                "Guidance scale must be a non-negative number (got {}).",
                self.guidance_scale
            )));
        }
        Ok(())
    }
}

/// A generated image after it has been persisted and encoded
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// Short random identifier, also part of the file name
    pub id: String,
    pub created_at: DateTime<Local>,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Base64 of the PNG bytes written to `path`
    pub image_base64: String,
}

impl GenerationResult {
    pub fn data_url(&self) -> String {
        crate::generation::encoding::png_data_url(&self.image_base64)
    }
}
