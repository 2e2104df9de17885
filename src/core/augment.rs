use crate::common::config::AugmentationConfig;
use image::{imageops, DynamicImage, Luma};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};

/// Produces synthetic training variants from one accepted sample.
pub trait SampleAugmenter: Send + Sync {
    /// The returned list contains at least the original.
    fn augment(&self, image: &DynamicImage, config: &AugmentationConfig) -> Vec<DynamicImage>;
}

/// Mirror, small rotations and brightness shifts.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicAugmenter;

impl SampleAugmenter for BasicAugmenter {
    fn augment(&self, image: &DynamicImage, config: &AugmentationConfig) -> Vec<DynamicImage> {
        let mut variants = vec![image.clone()];
        if !config.enabled {
            return variants;
        }

        if config.horizontal_flip {
            variants.push(image.fliph());
        }

        if config.rotation_degrees.abs() > f32::EPSILON {
            let gray = image.to_luma8();
            for sign in [1.0f32, -1.0] {
                let theta = (sign * config.rotation_degrees).to_radians();
                let rotated = rotate_about_center(&gray, theta, Interpolation::Bilinear, Luma([0]));
                variants.push(DynamicImage::ImageLuma8(rotated));
            }
        }

        if config.brightness_delta != 0 {
            let delta = config.brightness_delta.abs();
            variants.push(DynamicImage::ImageRgba8(imageops::brighten(image, delta)));
            variants.push(DynamicImage::ImageRgba8(imageops::brighten(image, -delta)));
        }

        variants
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;

    fn sample() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(20, 10, |x, _| Luma([(x * 10) as u8])))
    }

    #[test]
    fn disabled_returns_only_original() {
        let config = AugmentationConfig::default();
        let variants = BasicAugmenter.augment(&sample(), &config);
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].to_luma8(), sample().to_luma8());
    }

    #[test]
    fn all_variants_enabled() {
        let config = AugmentationConfig {
            enabled: true,
            horizontal_flip: true,
            rotation_degrees: 10.0,
            brightness_delta: 15,
        };
        let variants = BasicAugmenter.augment(&sample(), &config);
        // original, mirror, two rotations, brighter, darker
        assert_eq!(variants.len(), 6);
        for v in &variants {
            assert_eq!((v.width(), v.height()), (20, 10));
        }
        assert_eq!(variants[1].to_luma8().get_pixel(0, 0)[0], 190);
    }

    #[test]
    fn flip_only() {
        let config = AugmentationConfig {
            enabled: true,
            horizontal_flip: true,
            rotation_degrees: 0.0,
            brightness_delta: 0,
        };
        assert_eq!(BasicAugmenter.augment(&sample(), &config).len(), 2);
    }
}
