//! Local binary pattern histogram (LBPH) appearance model.
//!
//! Each sample is encoded as a grid of circular-LBP histograms; prediction is
//! a nearest-neighbour search over every stored sample with chi-square
//! distance. Training is cheap enough that incremental updates simply append
//! new histograms.

use crate::common::config::RecognizerConfig;
use crate::common::error::{RollcallError, Result};
use image::GrayImage;
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type Label = u32;

const PATTERN_EPSILON: f64 = 1e-6;
const HIST_EPSILON: f64 = 1e-10;

pub const MAX_RADIUS: u32 = 8;
pub const MAX_NEIGHBORS: u32 = 12;
pub const MAX_GRID: u32 = 32;
pub const MIN_THRESHOLD: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
    /// Distances at or above this are reported as no match.
    pub threshold: f64,
}

impl Default for LbphParams {
    fn default() -> Self {
        let defaults = RecognizerConfig::default();
        Self {
            radius: defaults.radius,
            neighbors: defaults.neighbors,
            grid_x: defaults.grid_x,
            grid_y: defaults.grid_y,
            threshold: defaults.max_review_distance,
        }
    }
}

impl LbphParams {
    /// Build parameters from config, replacing each invalid field with its
    /// default. The returned list describes every substitution made.
    pub fn from_config(config: &RecognizerConfig) -> (Self, Vec<RollcallError>) {
        let defaults = Self::default();
        let mut fallbacks = Vec::new();

        let mut bounded = |key: &'static str, value: u32, max: u32, default: u32| {
            if (1..=max).contains(&value) {
                value
            } else {
                fallbacks.push(RollcallError::ConfigurationFallback {
                    key,
                    reason: format!("{} is outside 1..={}", value, max),
                });
                default
            }
        };

        let radius = bounded("recognizer.radius", config.radius, MAX_RADIUS, defaults.radius);
        let neighbors = bounded("recognizer.neighbors", config.neighbors, MAX_NEIGHBORS, defaults.neighbors);
        let grid_x = bounded("recognizer.grid_x", config.grid_x, MAX_GRID, defaults.grid_x);
        let grid_y = bounded("recognizer.grid_y", config.grid_y, MAX_GRID, defaults.grid_y);

        let threshold = if config.max_review_distance.is_nan() {
            fallbacks.push(RollcallError::ConfigurationFallback {
                key: "recognizer.max_review_distance",
                reason: "not a number".into(),
            });
            defaults.threshold
        } else {
            config.max_review_distance.max(MIN_THRESHOLD)
        };

        (Self { radius, neighbors, grid_x, grid_y, threshold }, fallbacks)
    }

    /// Reject parameters the encoder cannot run with. Used for anything not
    /// built by [`LbphParams::from_config`], such as a model read from disk.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("radius", self.radius, MAX_RADIUS),
            ("neighbors", self.neighbors, MAX_NEIGHBORS),
            ("grid_x", self.grid_x, MAX_GRID),
            ("grid_y", self.grid_y, MAX_GRID),
        ];
        for (name, value, max) in fields {
            if !(1..=max).contains(&value) {
                return Err(RollcallError::Model(format!(
                    "LBPH {} = {} is outside 1..={}", name, value, max
                )));
            }
        }
        if self.threshold.is_nan() {
            return Err(RollcallError::Model("LBPH threshold is not a number".into()));
        }
        Ok(())
    }

    fn bins(&self) -> usize {
        1usize << self.neighbors
    }
}

/// Raw model answer: `label` is `None` when nothing is closer than the
/// threshold (or nothing is trained), in which case distance is infinite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrediction {
    pub label: Option<Label>,
    pub distance: f64,
}

impl ModelPrediction {
    pub fn no_match() -> Self {
        Self { label: None, distance: f64::INFINITY }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbphModel {
    params: LbphParams,
    sample_size: Option<(u32, u32)>,
    histograms: Vec<Vec<f32>>,
    labels: Vec<Label>,
}

impl LbphModel {
    pub fn new(params: LbphParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            sample_size: None,
            histograms: Vec::new(),
            labels: Vec::new(),
        })
    }

    pub fn params(&self) -> &LbphParams {
        &self.params
    }

    /// The rejection threshold is policy, not learned state, so it may change
    /// without retraining.
    pub fn set_threshold(&mut self, threshold: f64) {
        self.params.threshold = threshold.max(MIN_THRESHOLD);
    }

    /// Structural check for a model that did not come from [`LbphModel::new`],
    /// e.g. one decoded from disk.
    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;
        if self.histograms.len() != self.labels.len() {
            return Err(RollcallError::Model(format!(
                "{} histograms but {} labels", self.histograms.len(), self.labels.len()
            )));
        }
        let expected = (self.params.grid_x * self.params.grid_y) as usize * self.params.bins();
        if let Some(bad) = self.histograms.iter().find(|h| h.len() != expected) {
            return Err(RollcallError::Model(format!(
                "histogram has {} bins, expected {}", bad.len(), expected
            )));
        }
        Ok(())
    }

    pub fn is_trained(&self) -> bool {
        !self.histograms.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.histograms.len()
    }

    pub fn sample_size(&self) -> Option<(u32, u32)> {
        self.sample_size
    }

    /// Distinct labels with at least one stored sample.
    pub fn labels(&self) -> BTreeSet<Label> {
        self.labels.iter().copied().collect()
    }

    /// Discard everything learned and fit from scratch.
    pub fn train(&mut self, samples: &[GrayImage], labels: &[Label]) -> Result<()> {
        let encoded = self.encode_batch(samples, labels, None)?;
        self.sample_size = samples.first().map(|s| s.dimensions());
        self.histograms = encoded;
        self.labels = labels.to_vec();
        Ok(())
    }

    /// Add samples without forgetting previously learned labels.
    pub fn update(&mut self, samples: &[GrayImage], labels: &[Label]) -> Result<()> {
        let encoded = self.encode_batch(samples, labels, self.sample_size)?;
        if self.sample_size.is_none() {
            self.sample_size = samples.first().map(|s| s.dimensions());
        }
        self.histograms.extend(encoded);
        self.labels.extend_from_slice(labels);
        Ok(())
    }

    pub fn predict(&self, sample: &GrayImage) -> ModelPrediction {
        if !self.is_trained() {
            return ModelPrediction::no_match();
        }
        if let Some(expected) = self.sample_size {
            if expected != sample.dimensions() {
                tracing::warn!(
                    ?expected,
                    actual = ?sample.dimensions(),
                    "query size differs from training samples; preprocessing mismatch?"
                );
            }
        }

        let query = self.encode(sample);
        let mut best = ModelPrediction::no_match();
        for (hist, label) in self.histograms.iter().zip(&self.labels) {
            let distance = chi_square(hist, &query);
            if distance < best.distance && distance < self.params.threshold {
                best = ModelPrediction { label: Some(*label), distance };
            }
        }
        best
    }

    fn encode_batch(
        &self,
        samples: &[GrayImage],
        labels: &[Label],
        expected_size: Option<(u32, u32)>,
    ) -> Result<Vec<Vec<f32>>> {
        if samples.is_empty() {
            return Err(RollcallError::Model("no samples given".into()));
        }
        if samples.len() != labels.len() {
            return Err(RollcallError::Model(format!(
                "{} samples but {} labels", samples.len(), labels.len()
            )));
        }
        let size = expected_size.unwrap_or_else(|| samples[0].dimensions());
        if let Some(bad) = samples.iter().find(|s| s.dimensions() != size) {
            return Err(RollcallError::Model(format!(
                "sample size {:?} differs from {:?}", bad.dimensions(), size
            )));
        }
        Ok(samples.iter().map(|s| self.encode(s)).collect())
    }

    fn encode(&self, sample: &GrayImage) -> Vec<f32> {
        let codes = lbp_codes(sample, self.params.radius, self.params.neighbors);
        spatial_histogram(&codes, self.params.bins(), self.params.grid_x, self.params.grid_y)
    }
}

/// Circular LBP with bilinear interpolation of the sampling points. The
/// result is smaller than the input by `radius` on every side.
fn lbp_codes(image: &GrayImage, radius: u32, neighbors: u32) -> Array2<u32> {
    let (width, height) = image.dimensions();
    let r = radius as usize;
    let (w, h) = (width as usize, height as usize);
    if w <= 2 * r || h <= 2 * r {
        return Array2::zeros((0, 0));
    }

    let src = |row: isize, col: isize| image.get_pixel(col as u32, row as u32)[0] as f64;
    let mut codes = Array2::<u32>::zeros((h - 2 * r, w - 2 * r));

    for n in 0..neighbors {
        let angle = 2.0 * std::f64::consts::PI * n as f64 / neighbors as f64;
        let x = radius as f64 * angle.cos();
        let y = -(radius as f64) * angle.sin();

        let (fx, fy) = (x.floor() as isize, y.floor() as isize);
        let (cx, cy) = (x.ceil() as isize, y.ceil() as isize);
        let (tx, ty) = (x - x.floor(), y - y.floor());

        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        for i in r..h - r {
            for j in r..w - r {
                let (row, col) = (i as isize, j as isize);
                let t = w1 * src(row + fy, col + fx)
                    + w2 * src(row + fy, col + cx)
                    + w3 * src(row + cy, col + fx)
                    + w4 * src(row + cy, col + cx);
                let center = src(row, col);
                if t > center || (t - center).abs() < PATTERN_EPSILON {
                    codes[[i - r, j - r]] += 1 << n;
                }
            }
        }
    }
    codes
}

/// Concatenated per-cell histograms, each normalized by cell area.
fn spatial_histogram(codes: &Array2<u32>, bins: usize, grid_x: u32, grid_y: u32) -> Vec<f32> {
    let (grid_x, grid_y) = (grid_x as usize, grid_y as usize);
    let mut result = vec![0.0f32; grid_x * grid_y * bins];
    let (rows, cols) = codes.dim();
    let cell_h = rows / grid_y;
    let cell_w = cols / grid_x;
    if cell_h == 0 || cell_w == 0 {
        return result;
    }

    let area = (cell_h * cell_w) as f32;
    for gy in 0..grid_y {
        for gx in 0..grid_x {
            let offset = (gy * grid_x + gx) * bins;
            let cell = codes.slice(s![gy * cell_h..(gy + 1) * cell_h, gx * cell_w..(gx + 1) * cell_w]);
            for &code in cell.iter() {
                result[offset + code as usize] += 1.0;
            }
            for v in &mut result[offset..offset + bins] {
                *v /= area;
            }
        }
    }
    result
}

fn chi_square(reference: &[f32], query: &[f32]) -> f64 {
    reference
        .iter()
        .zip(query)
        .filter(|(a, _)| (**a as f64) > HIST_EPSILON)
        .map(|(a, b)| {
            let (a, b) = (*a as f64, *b as f64);
            (a - b).powi(2) / a
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Luma;
    use rstest::rstest;

    fn stripes(size: u32, period: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |_, y| {
            if (y / period) % 2 == 0 { Luma([230]) } else { Luma([20]) }
        })
    }

    fn checker(size: u32, cell: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if ((x / cell) + (y / cell)) % 2 == 0 { Luma([240]) } else { Luma([10]) }
        })
    }

    fn params(threshold: f64) -> LbphParams {
        LbphParams { threshold, ..LbphParams::default() }
    }

    #[test]
    fn untrained_model_predicts_no_match() {
        let model = LbphModel::new(LbphParams::default()).unwrap();
        assert_eq!(model.predict(&stripes(40, 4)), ModelPrediction::no_match());
    }

    #[test]
    fn exact_sample_has_zero_distance() {
        let mut model = LbphModel::new(params(1000.0)).unwrap();
        model.train(&[stripes(40, 4), checker(40, 5)], &[0, 1]).unwrap();

        let p = model.predict(&checker(40, 5));
        assert_eq!(p.label, Some(1));
        assert_relative_eq!(p.distance, 0.0);

        let p = model.predict(&stripes(40, 4));
        assert_eq!(p.label, Some(0));
    }

    #[test]
    fn threshold_rejects_distant_sample() {
        let mut model = LbphModel::new(params(MIN_THRESHOLD)).unwrap();
        model.train(&[stripes(40, 4), stripes(40, 4)], &[0, 0]).unwrap();
        let p = model.predict(&checker(40, 5));
        assert_eq!(p, ModelPrediction::no_match());
    }

    #[test]
    fn update_keeps_previous_labels() {
        let mut model = LbphModel::new(params(1000.0)).unwrap();
        model.train(&[stripes(40, 4), stripes(40, 4)], &[0, 0]).unwrap();
        model.update(&[checker(40, 5)], &[1]).unwrap();

        assert_eq!(model.sample_count(), 3);
        assert_eq!(model.labels().into_iter().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(model.predict(&stripes(40, 4)).label, Some(0));
        assert_eq!(model.predict(&checker(40, 5)).label, Some(1));
    }

    #[test]
    fn train_replaces_previous_state() {
        let mut model = LbphModel::new(params(1000.0)).unwrap();
        model.train(&[stripes(40, 4), checker(40, 5)], &[0, 1]).unwrap();
        model.train(&[checker(40, 5), checker(40, 5)], &[7, 7]).unwrap();
        assert_eq!(model.labels().into_iter().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let mut model = LbphModel::new(LbphParams::default()).unwrap();
        assert!(model.train(&[], &[]).is_err());
        assert!(model.train(&[stripes(40, 4)], &[0, 1]).is_err());
        assert!(model.train(&[stripes(40, 4), stripes(30, 4)], &[0, 1]).is_err());

        model.train(&[stripes(40, 4), stripes(40, 4)], &[0, 0]).unwrap();
        assert!(model.update(&[stripes(30, 4)], &[1]).is_err());
        assert_eq!(model.sample_count(), 2);
    }

    #[test]
    fn histogram_cells_are_normalized() {
        let p = LbphParams::default();
        let codes = lbp_codes(&checker(34, 4), p.radius, p.neighbors);
        assert_eq!(codes.dim(), (32, 32));
        let hist = spatial_histogram(&codes, p.bins(), p.grid_x, p.grid_y);
        assert_eq!(hist.len(), 64 * 256);
        for cell in hist.chunks(256) {
            assert_relative_eq!(cell.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn flat_image_encodes_all_ones_pattern() {
        let flat = GrayImage::from_pixel(10, 10, Luma([90]));
        let codes = lbp_codes(&flat, 1, 8);
        assert!(codes.iter().all(|&c| c == 255));
    }

    #[test]
    fn too_small_image_yields_empty_histogram() {
        let model = LbphModel::new(LbphParams::default()).unwrap();
        let hist = model.encode(&GrayImage::new(2, 2));
        assert!(hist.iter().all(|&v| v == 0.0));
    }

    #[rstest]
    #[case(RecognizerConfig { radius: 0, ..RecognizerConfig::default() }, 1)]
    #[case(RecognizerConfig { neighbors: 40, ..RecognizerConfig::default() }, 1)]
    #[case(RecognizerConfig { grid_x: 0, grid_y: 99, ..RecognizerConfig::default() }, 2)]
    #[case(RecognizerConfig { max_review_distance: f64::NAN, ..RecognizerConfig::default() }, 1)]
    #[case(RecognizerConfig::default(), 0)]
    fn invalid_fields_fall_back_to_defaults(#[case] config: RecognizerConfig, #[case] expected: usize) {
        let (params, fallbacks) = LbphParams::from_config(&config);
        assert_eq!(fallbacks.len(), expected);
        assert!(fallbacks
            .iter()
            .all(|e| matches!(e, RollcallError::ConfigurationFallback { .. })));
        assert!((1..=MAX_NEIGHBORS).contains(&params.neighbors));
        assert!(params.threshold >= MIN_THRESHOLD);
    }

    #[test]
    fn threshold_is_clamped_to_one() {
        let config = RecognizerConfig { max_review_distance: 0.2, ..RecognizerConfig::default() };
        let (params, fallbacks) = LbphParams::from_config(&config);
        assert!(fallbacks.is_empty());
        assert_eq!(params.threshold, 1.0);
    }

    #[rstest]
    #[case(LbphParams { grid_x: 0, ..LbphParams::default() })]
    #[case(LbphParams { grid_y: MAX_GRID + 1, ..LbphParams::default() })]
    #[case(LbphParams { neighbors: 64, ..LbphParams::default() })]
    #[case(LbphParams { radius: 0, ..LbphParams::default() })]
    #[case(LbphParams { threshold: f64::NAN, ..LbphParams::default() })]
    fn out_of_range_params_are_rejected(#[case] params: LbphParams) {
        assert!(matches!(params.validate(), Err(RollcallError::Model(_))));
        assert!(LbphModel::new(params).is_err());
    }

    #[test]
    fn validate_catches_inconsistent_state() {
        let mut model = LbphModel::new(params(1000.0)).unwrap();
        model.train(&[stripes(40, 4), checker(40, 5)], &[0, 1]).unwrap();
        assert!(model.validate().is_ok());

        let mut short_labels = model.clone();
        short_labels.labels.pop();
        assert!(short_labels.validate().is_err());

        let mut bad_grid = model.clone();
        bad_grid.params.grid_x = 0;
        assert!(bad_grid.validate().is_err());

        let mut truncated = model;
        truncated.histograms[0].truncate(10);
        assert!(truncated.validate().is_err());
    }
}
