pub mod lock;
pub mod source;
#[cfg(feature = "camera")]
pub mod v4l2;

pub use lock::{DeviceGuard, DeviceLock};
pub use source::{FrameSource, ImageSequence};
#[cfg(feature = "camera")]
pub use v4l2::{CameraInfo, V4lCamera};

use crate::common::error::Result;
use crate::core::quality::QualityGate;
use std::fs;
use std::path::{Path, PathBuf};

/// Pull frames from `source` until `count` of them pass the pre-capture
/// sharpness gate, saving each into `dest`. Every call to the source counts
/// as an attempt, including ones that yield no frame; gives up after
/// `max_attempts`.
pub fn capture_enrollment_samples(
    source: &mut dyn FrameSource,
    gate: &dyn QualityGate,
    threshold: f64,
    dest: &Path,
    count: usize,
    max_attempts: usize,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest)?;
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let mut saved = Vec::new();

    for attempt in 0..max_attempts {
        if saved.len() >= count {
            break;
        }
        let Some(frame) = source.capture_frame()? else {
            tracing::debug!("No frame on attempt {}", attempt);
            continue;
        };
        if !gate.is_sharp_enough(&frame, threshold) {
            tracing::debug!("Frame {} too blurry, retrying", attempt);
            continue;
        }
        let path = dest.join(format!("{}_{:03}.png", stamp, saved.len()));
        frame.save(&path)?;
        tracing::info!("Captured sample {}/{}: {}", saved.len() + 1, count, path.display());
        saved.push(path);
    }

    if saved.len() < count {
        tracing::warn!("Captured only {} of {} samples", saved.len(), count);
    }
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::quality::LaplacianVarianceGate;
    use image::{GrayImage, Luma};

    #[test]
    fn captures_only_sharp_frames() {
        let frames = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(20, 20, Luma([80])).save(frames.path().join("0.png")).unwrap();
        GrayImage::from_fn(20, 20, |x, _| Luma([if x % 2 == 0 { 255 } else { 0 }]))
            .save(frames.path().join("1.png"))
            .unwrap();
        GrayImage::from_fn(20, 20, |_, y| Luma([if y % 2 == 0 { 255 } else { 0 }]))
            .save(frames.path().join("2.png"))
            .unwrap();

        let dest = tempfile::tempdir().unwrap();
        let mut source = ImageSequence::open(frames.path()).unwrap();
        let saved = capture_enrollment_samples(
            &mut source, &LaplacianVarianceGate, 100.0, &dest.path().join("ada"), 5, 10,
        )
        .unwrap();

        assert_eq!(saved.len(), 2);
        assert!(saved.iter().all(|p| p.starts_with(dest.path().join("ada")) && p.is_file()));
    }

    #[test]
    fn stops_at_requested_count() {
        let frames = tempfile::tempdir().unwrap();
        for i in 0..4 {
            GrayImage::from_fn(10, 10, |x, y| Luma([((x * 25 + y * 7 + i) % 256) as u8]))
                .save(frames.path().join(format!("{i}.png")))
                .unwrap();
        }
        let dest = tempfile::tempdir().unwrap();
        let mut source = ImageSequence::open(frames.path()).unwrap();
        let saved = capture_enrollment_samples(
            &mut source, &LaplacianVarianceGate, 0.0, dest.path(), 2, 10,
        )
        .unwrap();
        assert_eq!(saved.len(), 2);
    }

    /// Yields nothing on every other call.
    struct Flaky {
        calls: usize,
    }

    impl FrameSource for Flaky {
        fn capture_frame(&mut self) -> Result<Option<image::DynamicImage>> {
            self.calls += 1;
            if self.calls % 2 == 1 {
                return Ok(None);
            }
            let frame = GrayImage::from_fn(12, 12, |x, y| Luma([if (x + y) % 2 == 0 { 255 } else { 0 }]));
            Ok(Some(image::DynamicImage::ImageLuma8(frame)))
        }
    }

    #[test]
    fn missing_frames_count_as_attempts() {
        let dest = tempfile::tempdir().unwrap();
        let mut source = Flaky { calls: 0 };
        let saved = capture_enrollment_samples(
            &mut source, &LaplacianVarianceGate, 0.0, dest.path(), 5, 6,
        )
        .unwrap();
        assert_eq!(source.calls, 6);
        assert_eq!(saved.len(), 3);
    }
}
