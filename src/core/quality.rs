use image::{DynamicImage, GrayImage};

/// Sharpness test applied to raw enrollment samples.
pub trait QualityGate: Send + Sync {
    fn is_sharp_enough(&self, image: &DynamicImage, threshold_variance: f64) -> bool;
}

/// Variance of the 4-neighbour Laplacian response. Blurry images have few
/// edges and therefore a low variance.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaplacianVarianceGate;

impl QualityGate for LaplacianVarianceGate {
    fn is_sharp_enough(&self, image: &DynamicImage, threshold_variance: f64) -> bool {
        if threshold_variance <= 0.0 {
            return true;
        }
        laplacian_variance(&image.to_luma8()) >= threshold_variance
    }
}

pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = gray.get_pixel(x, y)[0] as f64;
            let response = gray.get_pixel(x - 1, y)[0] as f64
                + gray.get_pixel(x + 1, y)[0] as f64
                + gray.get_pixel(x, y - 1)[0] as f64
                + gray.get_pixel(x, y + 1)[0] as f64
                - 4.0 * center;
            sum += response;
            sum_sq += response * response;
            count += 1;
        }
    }

    let mean = sum / count as f64;
    (sum_sq / count as f64) - mean * mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn checkerboard(size: u32, cell: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if ((x / cell) + (y / cell)) % 2 == 0 { Luma([255]) } else { Luma([0]) }
        })
    }

    #[test]
    fn flat_image_has_zero_variance() {
        let flat = GrayImage::from_pixel(32, 32, Luma([128]));
        assert_eq!(laplacian_variance(&flat), 0.0);
    }

    #[test]
    fn blurred_image_scores_lower() {
        let sharp = checkerboard(64, 4);
        let blurred = imageproc::filter::gaussian_blur_f32(&sharp, 3.0);
        assert!(laplacian_variance(&sharp) > laplacian_variance(&blurred));
    }

    #[test]
    fn zero_threshold_accepts_everything() {
        let flat = DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([0])));
        assert!(LaplacianVarianceGate.is_sharp_enough(&flat, 0.0));
    }

    #[test]
    fn gate_rejects_flat_image_with_threshold() {
        let gate = LaplacianVarianceGate;
        let flat = DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([0])));
        let sharp = DynamicImage::ImageLuma8(checkerboard(16, 2));
        assert!(!gate.is_sharp_enough(&flat, 10.0));
        assert!(gate.is_sharp_enough(&sharp, 10.0));
    }

    #[test]
    fn tiny_images_score_zero() {
        assert_eq!(laplacian_variance(&GrayImage::new(2, 2)), 0.0);
    }
}
