use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RollcallError {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Capture device busy: lock not acquired within {0:?}")]
    DeviceBusy(Duration),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Identity not enrolled: {0}")]
    IdentityNotFound(String),

    #[error("Insufficient training data: {accepted} accepted sample(s), at least 2 required")]
    InsufficientTrainingData { accepted: usize },

    #[error("Training directory not found: {0}")]
    MissingTrainingDirectory(PathBuf),

    #[error("Sample rejected by quality gate: {path} (variance threshold {threshold})")]
    SampleRejected { path: PathBuf, threshold: f64 },

    #[error("Malformed label mapping at line {line}: {content:?}")]
    LabelMappingCorruption { line: usize, content: String },

    #[error("Invalid setting {key}: {reason}; using default")]
    ConfigurationFallback { key: &'static str, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RollcallError>;
