//! Render settings, loadable from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::Camera;
use crate::tile::tile_size_for;
use crate::trace::DEFAULT_RAY_DEPTH;

pub const DEFAULT_WIDTH: u32 = 576;
pub const DEFAULT_HEIGHT: u32 = 324;

/// Squared color distance below which a square's corners count as equal.
pub const DEFAULT_COLOR_DELTA: f32 = 0.003;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("Tile size {0} is not a power of two")]
    TileSizeNotPowerOfTwo(u32),

    #[error("Color delta {0} must be a finite, non-negative number")]
    InvalidColorDelta(f32),

    #[error("Failed to read settings {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse settings {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Failed to serialize settings: {0}")]
    Serialize(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Everything that controls one render.
///
/// Missing JSON fields fall back to [`RenderSettings::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    /// Tile edge length; must be a power of two
    pub tile_size: u32,
    /// Jittered camera rays averaged per traced pixel
    pub samples_per_pixel: u32,
    pub ray_depth: u32,
    /// Explicit camera; derived from the resolution when absent
    pub camera: Option<Camera>,
    pub color_delta: f32,
    /// Largest square that may be interpolated instead of traced
    pub max_trustable_size: u32,
    /// Trace every pixel when false
    pub adaptive: bool,
    pub seed: u64,
    /// Worker threads; hardware concurrency when absent
    pub threads: Option<usize>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self::for_resolution(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}

impl RenderSettings {
    /// Defaults scaled to a `width` x `height` image: tile size from the
    /// width, trustable size from the height.
    pub fn for_resolution(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tile_size: tile_size_for(width / 8),
            samples_per_pixel: 1,
            ray_depth: DEFAULT_RAY_DEPTH,
            camera: None,
            color_delta: DEFAULT_COLOR_DELTA,
            max_trustable_size: (height / 120).max(1),
            adaptive: true,
            seed: 0,
            threads: None,
        }
    }

    /// Load settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let settings: Self = serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let sizes = [
            ("width", self.width),
            ("height", self.height),
            ("tile_size", self.tile_size),
            ("samples_per_pixel", self.samples_per_pixel),
            ("max_trustable_size", self.max_trustable_size),
        ];
        if let Some(&(field, _)) = sizes.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero { field });
        }
        if self.threads == Some(0) {
            return Err(ConfigError::Zero { field: "threads" });
        }
        if !self.tile_size.is_power_of_two() {
            return Err(ConfigError::TileSizeNotPowerOfTwo(self.tile_size));
        }
        if !self.color_delta.is_finite() || self.color_delta < 0.0 {
            return Err(ConfigError::InvalidColorDelta(self.color_delta));
        }
        Ok(())
    }

    pub fn camera(&self) -> Camera {
        self.camera.unwrap_or_else(|| Camera::for_resolution(self.width, self.height))
    }
}
