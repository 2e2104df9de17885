use crate::common::config::PreprocessingConfig;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use std::fmt;
use std::sync::Arc;

/// One preprocessing step.
pub type Stage = Arc<dyn Fn(&GrayImage) -> GrayImage + Send + Sync>;

/// Ordered image transforms shared by training and recognition.
///
/// Input is converted to 8-bit luma before the first stage, and the last stage
/// is always the canonical resize, so every output has the same dimensions.
/// The recognizer keeps exactly one pipeline per model generation; using a
/// different pipeline at inference than at training silently ruins accuracy.
#[derive(Clone)]
pub struct Preprocessor {
    stages: Vec<Stage>,
    width: u32,
    height: u32,
}

impl Preprocessor {
    pub fn from_config(config: &PreprocessingConfig) -> Self {
        let mut builder = PreprocessorBuilder::default();
        if config.equalize {
            builder = builder.stage(equalize());
        }
        builder.build(config.width, config.height)
    }

    pub fn builder() -> PreprocessorBuilder {
        PreprocessorBuilder::default()
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn run(&self, image: &DynamicImage) -> GrayImage {
        let gray = image.to_luma8();
        self.run_gray(gray)
    }

    pub fn run_gray(&self, image: GrayImage) -> GrayImage {
        self.stages.iter().fold(image, |img, stage| stage(&img))
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::from_config(&PreprocessingConfig::default())
    }
}

impl fmt::Debug for Preprocessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preprocessor")
            .field("stages", &self.stages.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

#[derive(Default)]
pub struct PreprocessorBuilder {
    stages: Vec<Stage>,
}

impl PreprocessorBuilder {
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Finish with the canonical resize. Zero sizes are bumped to one pixel.
    pub fn build(mut self, width: u32, height: u32) -> Preprocessor {
        let width = width.max(1);
        let height = height.max(1);
        self.stages.push(resize(width, height));
        Preprocessor {
            stages: self.stages,
            width,
            height,
        }
    }
}

pub fn equalize() -> Stage {
    Arc::new(|img: &GrayImage| imageproc::contrast::equalize_histogram(img))
}

pub fn resize(width: u32, height: u32) -> Stage {
    Arc::new(move |img: &GrayImage| {
        if img.dimensions() == (width, height) {
            img.clone()
        } else {
            imageops::resize(img, width, height, FilterType::Triangle)
        }
    })
}
