//! Fixed pipeline constants and the TOML-backed ambient configuration.

use crate::camera::{CaptureConstraints, FacingMode};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Strict decision threshold: a score of exactly this value is negative.
pub const POSITIVE_THRESHOLD: f32 = 0.5;
/// Largest accepted upload, inclusive.
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
/// Spatial input size of the model (square).
pub const INPUT_SIZE: u32 = 224;
pub const INPUT_CHANNELS: usize = 3;
/// JPEG quality used for camera snapshots (0.8 on a 0..1 scale).
pub const CAPTURE_JPEG_QUALITY: u8 = 80;
/// Artifact file name, resolved inside [`PipelineConfig::model_dir`].
pub const MODEL_FILE_NAME: &str = "model.onnx";
/// Optional metadata written next to the artifact by the conversion tooling.
pub const MODEL_INFO_FILE_NAME: &str = "model_info.json";

/// Camera preferences passed to the platform when a session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub facing: FacingMode,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            ideal_width: 640,
            ideal_height: 480,
            facing: FacingMode::Environment,
        }
    }
}

/// Ambient settings. Decision constants above are deliberately not part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model_dir: PathBuf,
    /// Analyze right after an image is acquired when the model is ready.
    pub auto_analyze: bool,
    pub camera: CameraConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("."),
            auto_analyze: true,
            camera: CameraConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(MODEL_FILE_NAME)
    }

    pub fn model_info_path(&self) -> PathBuf {
        self.model_dir.join(MODEL_INFO_FILE_NAME)
    }

    pub fn capture_constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            ideal_width: self.camera.ideal_width,
            ideal_height: self.camera.ideal_height,
            facing: self.camera.facing,
            audio: false,
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("invalid pipeline configuration")
    }

    /// Reads the config file, falling back to defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let raw = toml::to_string_pretty(self).context("cannot serialize configuration")?;
        fs::write(path, raw).with_context(|| format!("cannot write config {}", path.display()))
    }
}
