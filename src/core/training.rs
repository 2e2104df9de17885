use crate::common::config::AugmentationConfig;
use crate::common::error::{RollcallError, Result};
use crate::core::augment::SampleAugmenter;
use crate::core::preprocess::Preprocessor;
use crate::core::quality::QualityGate;
use image::GrayImage;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Cooperative cancellation for long-running training. Checked between
/// samples; an aborted gather leaves the engine untouched.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|known| e.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// One `(identity, directory)` per subdirectory of `root`, sorted by name so
/// label assignment does not depend on filesystem order.
pub fn identity_dirs(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if !name.starts_with('.') => dirs.push((name.to_string(), path.clone())),
            Some(_) => {}
            None => tracing::warn!("Skipping non UTF-8 identity directory {:?}", path),
        }
    }
    dirs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(dirs)
}

/// Turns a directory of raw enrollment photos into preprocessed samples:
/// extension filter, decode, quality gate, augmentation, preprocessing.
pub struct SampleGatherer<'a> {
    pub gate: &'a dyn QualityGate,
    pub augmenter: &'a dyn SampleAugmenter,
    pub augmentation: &'a AugmentationConfig,
    pub preprocessor: &'a Preprocessor,
    pub blur_threshold: f64,
    pub cancel: &'a CancelToken,
}

impl SampleGatherer<'_> {
    /// Bad files are logged and skipped. Only an unreadable directory or a
    /// cancellation is an error.
    pub fn gather(&self, dir: &Path) -> Result<Vec<GrayImage>> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        files.sort();

        let mut samples = Vec::new();
        for path in files {
            if self.cancel.is_cancelled() {
                return Err(RollcallError::Cancelled);
            }
            if !is_image_file(&path) {
                tracing::debug!("Skipping non-image file {:?}", path);
                continue;
            }

            let image = match image::open(&path) {
                Ok(img) if img.width() > 0 && img.height() > 0 => img,
                Ok(_) => {
                    tracing::warn!("Skipping empty image {:?}", path);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable image {:?}: {}", path, e);
                    continue;
                }
            };

            if !self.gate.is_sharp_enough(&image, self.blur_threshold) {
                tracing::debug!("{}", RollcallError::SampleRejected {
                    path: path.clone(),
                    threshold: self.blur_threshold,
                });
                continue;
            }

            for variant in self.augmenter.augment(&image, self.augmentation) {
                samples.push(self.preprocessor.run(&variant));
            }
        }
        Ok(samples)
    }
}
