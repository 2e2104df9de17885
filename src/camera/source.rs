use crate::common::error::Result;
use crate::core::training::is_image_file;
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};

/// Anything that yields frames. `Ok(None)` means no frame this call, not a
/// failure.
pub trait FrameSource {
    fn capture_frame(&mut self) -> Result<Option<DynamicImage>>;
}

/// Replays the images of a directory in file-name order.
pub struct ImageSequence {
    frames: Vec<PathBuf>,
    next: usize,
}

impl ImageSequence {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut frames: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image_file(p))
            .collect();
        frames.sort();
        Ok(Self { frames, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Path of the frame most recently returned.
    pub fn current_path(&self) -> Option<&Path> {
        self.next.checked_sub(1).and_then(|i| self.frames.get(i)).map(PathBuf::as_path)
    }
}

impl FrameSource for ImageSequence {
    fn capture_frame(&mut self) -> Result<Option<DynamicImage>> {
        let Some(path) = self.frames.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        Ok(Some(image::open(path)?))
    }
}
