use std::path::PathBuf;
use std::fs;
use crate::common::error::Result;
use crate::common::paths;

/// Resolves where training images, models and debug output live.
///
/// In dev mode everything goes under `./dev_data` so experiments never touch
/// the user's enrolled roster.
#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        let base_dir = if enabled {
            PathBuf::from("./dev_data")
        } else {
            paths::user_data_dir()
        };
        Self::with_base_dir(enabled, base_dir)
    }

    pub fn with_base_dir(enabled: bool, base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(paths::training_dir(&base_dir))?;
        fs::create_dir_all(paths::model_dir(&base_dir))?;

        if enabled {
            fs::create_dir_all(base_dir.join("debug"))?;
            tracing::info!("Development mode enabled - data will be saved to: {}",
                     base_dir.display());
        }

        Ok(Self { enabled, base_dir })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn training_dir(&self) -> PathBuf {
        paths::training_dir(&self.base_dir)
    }

    pub fn model_dir(&self) -> PathBuf {
        paths::model_dir(&self.base_dir)
    }

    /// Where `replay` writes annotated frames by default; dev mode only.
    pub fn debug_dir(&self) -> Option<PathBuf> {
        self.enabled.then(|| self.base_dir.join("debug"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_training_and_model_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let dev = DevMode::with_base_dir(true, tmp.path().to_path_buf()).unwrap();
        assert!(dev.training_dir().is_dir());
        assert!(dev.model_dir().is_dir());
        assert!(tmp.path().join("debug").is_dir());
    }

    #[test]
    fn debug_dir_only_in_dev_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let dev = DevMode::with_base_dir(true, tmp.path().join("dev")).unwrap();
        assert_eq!(dev.debug_dir(), Some(tmp.path().join("dev").join("debug")));

        let prod = DevMode::with_base_dir(false, tmp.path().join("prod")).unwrap();
        assert_eq!(prod.debug_dir(), None);
        assert!(!tmp.path().join("prod").join("debug").exists());
    }
}
