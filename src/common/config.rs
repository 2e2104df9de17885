use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::common::error::{RollcallError, Result};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub preprocessing: PreprocessingConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub augmentation: AugmentationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
    /// How long to wait for another capture session to release the device.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,
}

fn default_camera_width() -> u32 { 640 }
fn default_camera_height() -> u32 { 480 }
fn default_warmup_frames() -> u32 { 3 }
fn default_warmup_delay() -> u64 { 50 }
fn default_lock_timeout() -> u64 { 2000 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
            warmup_frames: default_warmup_frames(),
            warmup_delay_ms: default_warmup_delay(),
            lock_timeout_ms: default_lock_timeout(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TrackerConfig {
    #[serde(default = "default_max_age")]
    pub max_age_ms: u64,
    /// Minimum time between two recognitions of the same track.
    #[serde(default = "default_recognition_interval")]
    pub recognition_interval_ms: u64,
}

fn default_max_age() -> u64 { 1000 }
fn default_recognition_interval() -> u64 { 500 }

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_age_ms: default_max_age(),
            recognition_interval_ms: default_recognition_interval(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PreprocessingConfig {
    #[serde(default = "default_true")]
    pub equalize: bool,
    #[serde(default = "default_face_size")]
    pub width: u32,
    #[serde(default = "default_face_size")]
    pub height: u32,
}

fn default_true() -> bool { true }
fn default_face_size() -> u32 { 100 }

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            equalize: true,
            width: default_face_size(),
            height: default_face_size(),
        }
    }
}

/// LBPH hyperparameters. Changing any of these invalidates a trained model.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognizerConfig {
    #[serde(default = "default_radius")]
    pub radius: u32,
    #[serde(default = "default_neighbors")]
    pub neighbors: u32,
    #[serde(default = "default_grid")]
    pub grid_x: u32,
    #[serde(default = "default_grid")]
    pub grid_y: u32,
    /// Largest distance still worth showing to an operator for manual review.
    /// Predictions above it are reported as unknown.
    #[serde(default = "default_max_review_distance")]
    pub max_review_distance: f64,
}

fn default_radius() -> u32 { 1 }
fn default_neighbors() -> u32 { 8 }
fn default_grid() -> u32 { 8 }
fn default_max_review_distance() -> f64 { 80.0 }

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            radius: default_radius(),
            neighbors: default_neighbors(),
            grid_x: default_grid(),
            grid_y: default_grid(),
            max_review_distance: default_max_review_distance(),
        }
    }
}

/// Blur-variance thresholds. Zero disables the corresponding gate.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct QualityConfig {
    #[serde(default)]
    pub pre_capture_blur_threshold: f64,
    #[serde(default)]
    pub post_capture_blur_threshold: f64,
}

impl QualityConfig {
    /// Threshold applied to stored enrollment images: post-capture wins when set.
    pub fn training_threshold(&self) -> f64 {
        if self.post_capture_blur_threshold > 0.0 {
            self.post_capture_blur_threshold
        } else if self.pre_capture_blur_threshold > 0.0 {
            self.pre_capture_blur_threshold
        } else {
            0.0
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AugmentationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub horizontal_flip: bool,
    /// Each accepted sample is also rotated by +/- this many degrees (0 = off).
    #[serde(default = "default_rotation")]
    pub rotation_degrees: f32,
    /// Each accepted sample is also brightened and darkened by this amount (0 = off).
    #[serde(default = "default_brightness")]
    pub brightness_delta: i32,
}

fn default_rotation() -> f32 { 8.0 }
fn default_brightness() -> i32 { 20 }

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            horizontal_flip: true,
            rotation_degrees: default_rotation(),
            brightness_delta: default_brightness(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// Root holding one subdirectory of images per identity.
    #[serde(default)]
    pub training_root: Option<PathBuf>,
    /// Directory holding the persisted model and label table.
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "configs/rollcall.toml";
        Self::load_from_path(&PathBuf::from(config_path))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RollcallError::Config(format!(
                "Config file not found: {}", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| RollcallError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Strict validation used when loading a file for the CLI. The recognizer
    /// engine itself never rejects a config; it substitutes defaults instead.
    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(RollcallError::Config(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(RollcallError::Config(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }

        if self.tracker.max_age_ms == 0 {
            return Err(RollcallError::Config(
                "Tracker max_age_ms must be greater than 0".into()
            ));
        }

        if self.preprocessing.width == 0 || self.preprocessing.width > 1024 {
            return Err(RollcallError::Config(format!(
                "Preprocessing width must be between 1 and 1024, got {}",
                self.preprocessing.width
            )));
        }
        if self.preprocessing.height == 0 || self.preprocessing.height > 1024 {
            return Err(RollcallError::Config(format!(
                "Preprocessing height must be between 1 and 1024, got {}",
                self.preprocessing.height
            )));
        }

        if self.quality.pre_capture_blur_threshold < 0.0
            || self.quality.post_capture_blur_threshold < 0.0
        {
            return Err(RollcallError::Config(
                "Blur thresholds must not be negative".into()
            ));
        }

        Ok(())
    }
}
