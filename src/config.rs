// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::{CaptureBackendType, CaptureConfig, DevicePaths, Side};
use crate::constants::limits;
use crate::errors::{AppError, AppResult, ConfigError};
use crate::gpu::GpuPreference;
use crate::render::{CompositionPolicy, TextureOptions};
use crate::shaders::Colorimetry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory name under the user config dir
const CONFIG_DIR: &str = "camera-pipeline";
const CONFIG_FILE: &str = "config.json";

/// How capture sources hand frames to the render loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Routing {
    /// Shared bounded queue with drop-oldest backpressure
    #[default]
    Queue,
    /// Small per-side channel straight to the render loop
    Direct,
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capture config of the front slot
    pub front: CaptureConfig,
    /// Capture config of the back slot
    pub back: CaptureConfig,
    /// Run both slots; when false only the front slot is attached
    pub dual: bool,
    /// Per-side queue capacity
    pub queue_capacity: usize,
    pub routing: Routing,
    pub colorimetry: Colorimetry,
    pub composition: CompositionPolicy,
    pub texture_options: TextureOptions,
    pub gpu: GpuPreference,
    pub capture_backend: CaptureBackendType,
    pub device_paths: DevicePaths,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            front: CaptureConfig::for_side(Side::Front),
            back: CaptureConfig::for_side(Side::Back),
            dual: true,
            queue_capacity: limits::DEFAULT_QUEUE_CAPACITY,
            routing: Routing::default(),
            colorimetry: Colorimetry::default(),
            composition: CompositionPolicy::PictureInPicture {
                main: Side::Back,
                inset: Side::Front,
            },
            texture_options: TextureOptions::default(),
            gpu: GpuPreference::default(),
            capture_backend: CaptureBackendType::default(),
            device_paths: DevicePaths::default(),
        }
    }
}

impl PipelineConfig {
    /// Capture config of one slot
    pub fn capture(&self, side: Side) -> &CaptureConfig {
        match side {
            Side::Front => &self.front,
            Side::Back => &self.back,
        }
    }

    pub fn capture_mut(&mut self, side: Side) -> &mut CaptureConfig {
        match side {
            Side::Front => &mut self.front,
            Side::Back => &mut self.back,
        }
    }

    /// Slots that get a capture source
    pub fn active_sides(&self) -> Vec<Side> {
        if self.dual {
            Side::ALL.to_vec()
        } else {
            vec![Side::Front]
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 || self.queue_capacity > limits::MAX_QUEUE_CAPACITY {
            return Err(ConfigError::InvalidCapacity(self.queue_capacity));
        }
        for side in self.active_sides() {
            self.capture(side).validate()?;
        }
        Ok(())
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Parse and validate a JSON config
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file
    pub fn load(path: &Path) -> AppResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        info!(path = %path.display(), "Loaded pipeline config");
        Ok(config)
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load_default() -> AppResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            Some(path) => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Write the config as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json =
            serde_json::to_string_pretty(self).map_err(|e| AppError::Storage(e.to_string()))?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Saved pipeline config");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.active_sides(), vec![Side::Front, Side::Back]);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            PipelineConfig::from_json(r#"{ "queue_capacity": 2, "dual": false }"#).unwrap();
        assert_eq!(config.queue_capacity, 2);
        assert_eq!(config.active_sides(), vec![Side::Front]);
        assert_eq!(config.front, CaptureConfig::for_side(Side::Front));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(
            PipelineConfig::from_json(r#"{ "queue_capacity": 0 }"#),
            Err(ConfigError::InvalidCapacity(0))
        );
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        assert!(matches!(
            PipelineConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
