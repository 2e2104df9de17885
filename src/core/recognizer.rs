use crate::common::config::{AugmentationConfig, Config, PreprocessingConfig};
use crate::common::error::{RollcallError, Result};
use crate::core::augment::{BasicAugmenter, SampleAugmenter};
use crate::core::labels::LabelMap;
use crate::core::lbph::{Label, LbphModel, LbphParams};
use crate::core::preprocess::Preprocessor;
use crate::core::quality::{LaplacianVarianceGate, QualityGate};
use crate::core::training::{identity_dirs, CancelToken, SampleGatherer};
use crate::storage::ModelStore;
use image::{DynamicImage, GrayImage};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

pub const UNKNOWN_IDENTITY: &str = "unknown";

const MAX_FACE_SIZE: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub identity: String,
    pub distance: f64,
}

impl Prediction {
    pub fn unknown() -> Self {
        Self {
            identity: UNKNOWN_IDENTITY.to_string(),
            distance: f64::INFINITY,
        }
    }

    pub fn is_known(&self) -> bool {
        self.identity != UNKNOWN_IDENTITY
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingSummary {
    pub generation: u64,
    pub identities: usize,
    pub samples: usize,
}

/// Result of a training call. Training never fails outward: when it cannot
/// proceed the engine keeps its previous state and says why.
#[derive(Debug)]
pub enum TrainOutcome {
    Trained(TrainingSummary),
    Unchanged(RollcallError),
}

impl TrainOutcome {
    pub fn is_trained(&self) -> bool {
        matches!(self, TrainOutcome::Trained(_))
    }
}

#[derive(Debug)]
pub enum RemoveOutcome {
    NotEnrolled,
    /// Retrained from the remembered training root.
    Retrained(TrainOutcome),
    /// No training root known; the engine dropped its model.
    Untrained,
}

/// One immutable trained snapshot. Recognition holds an `Arc` to it, so a
/// concurrent retrain never shows a model paired with the wrong labels.
struct Generation {
    id: u64,
    model: Arc<LbphModel>,
    labels: LabelMap,
    preprocessor: Arc<Preprocessor>,
}

struct EngineState {
    params: LbphParams,
    preprocessor: Arc<Preprocessor>,
    blur_threshold: f64,
    augmentation: AugmentationConfig,
    trained: Option<Arc<Generation>>,
    next_label: Label,
    next_generation: u64,
    training_root: Option<PathBuf>,
}

impl EngineState {
    fn install(&mut self, model: Arc<LbphModel>, labels: LabelMap, preprocessor: Arc<Preprocessor>) -> u64 {
        let id = self.next_generation;
        self.next_generation += 1;
        let high = labels.max_label().into_iter().chain(model.labels().into_iter().next_back());
        if let Some(max) = high.max() {
            self.next_label = self.next_label.max(max + 1);
        }
        self.trained = Some(Arc::new(Generation { id, model, labels, preprocessor }));
        id
    }
}

/// Appearance-model lifecycle: train, incremental update, removal, recognition
/// and persistence.
///
/// `recognize` takes a read lock just long enough to clone the current
/// generation. Lifecycle operations are serialized by a separate mutex and only
/// take the write lock to install their result, so gathering and fitting never
/// block recognition.
pub struct RecognizerEngine {
    state: RwLock<EngineState>,
    lifecycle: Mutex<()>,
    gate: Box<dyn QualityGate>,
    augmenter: Box<dyn SampleAugmenter>,
}

impl RecognizerEngine {
    pub fn new(config: &Config) -> Self {
        let (params, preprocessor, blur_threshold) = sanitize(config);
        Self {
            state: RwLock::new(EngineState {
                params,
                preprocessor: Arc::new(preprocessor),
                blur_threshold,
                augmentation: config.augmentation.clone(),
                trained: None,
                next_label: 0,
                next_generation: 1,
                training_root: config.storage.training_root.clone(),
            }),
            lifecycle: Mutex::new(()),
            gate: Box::new(LaplacianVarianceGate),
            augmenter: Box::new(BasicAugmenter),
        }
    }

    pub fn with_quality_gate(mut self, gate: Box<dyn QualityGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_augmenter(mut self, augmenter: Box<dyn SampleAugmenter>) -> Self {
        self.augmenter = augmenter;
        self
    }

    pub fn with_training_root(self, root: impl Into<PathBuf>) -> Self {
        self.write_state().training_root = Some(root.into());
        self
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, EngineState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, EngineState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn serialize_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Option<Arc<Generation>> {
        self.read_state().trained.clone()
    }

    pub fn is_trained(&self) -> bool {
        self.read_state().trained.is_some()
    }

    /// Id of the installed generation, `None` while untrained.
    pub fn generation(&self) -> Option<u64> {
        self.read_state().trained.as_ref().map(|g| g.id)
    }

    pub fn identities(&self) -> Vec<(Label, String)> {
        self.current()
            .map(|g| g.labels.iter().map(|(l, id)| (l, id.to_string())).collect())
            .unwrap_or_default()
    }

    pub fn label_of(&self, identity: &str) -> Option<Label> {
        self.current().and_then(|g| g.labels.label(identity))
    }

    pub fn training_root(&self) -> Option<PathBuf> {
        self.read_state().training_root.clone()
    }

    pub fn preprocessor(&self) -> Arc<Preprocessor> {
        self.read_state().preprocessor.clone()
    }

    pub fn recognize(&self, face: &DynamicImage) -> Prediction {
        let Some(generation) = self.current() else {
            return Prediction::unknown();
        };
        let sample = generation.preprocessor.run(face);
        Self::predict_with(&generation, &sample)
    }

    fn predict_with(generation: &Generation, sample: &GrayImage) -> Prediction {
        let raw = generation.model.predict(sample);
        let distance = raw.distance.max(0.0);
        match raw.label.and_then(|l| generation.labels.identity(l)) {
            Some(identity) => Prediction { identity: identity.to_string(), distance },
            None => Prediction::unknown(),
        }
    }

    pub fn train(&self, root: &Path) -> TrainOutcome {
        self.train_cancellable(root, &CancelToken::new())
    }

    pub fn train_cancellable(&self, root: &Path, cancel: &CancelToken) -> TrainOutcome {
        let _serial = self.serialize_lifecycle();
        self.train_locked(root, cancel)
    }

    fn train_locked(&self, root: &Path, cancel: &CancelToken) -> TrainOutcome {
        if !root.is_dir() {
            return unchanged(RollcallError::MissingTrainingDirectory(root.to_path_buf()));
        }

        let (params, preprocessor, blur_threshold, augmentation) = {
            let state = self.read_state();
            (state.params, state.preprocessor.clone(), state.blur_threshold, state.augmentation.clone())
        };
        let gatherer = SampleGatherer {
            gate: self.gate.as_ref(),
            augmenter: self.augmenter.as_ref(),
            augmentation: &augmentation,
            preprocessor: &preprocessor,
            blur_threshold,
            cancel,
        };

        let dirs = match identity_dirs(root) {
            Ok(dirs) => dirs,
            Err(e) => return unchanged(e),
        };

        let mut labels = LabelMap::new();
        let mut samples = Vec::new();
        let mut sample_labels = Vec::new();
        let mut next: Label = 0;

        for (identity, dir) in dirs {
            let gathered = match gatherer.gather(&dir) {
                Ok(gathered) => gathered,
                Err(RollcallError::Cancelled) => return unchanged(RollcallError::Cancelled),
                Err(e) => {
                    tracing::warn!("Skipping identity {}: {}", identity, e);
                    continue;
                }
            };
            if gathered.is_empty() {
                tracing::warn!("No usable samples for identity {}", identity);
                continue;
            }
            tracing::debug!(identity = %identity, label = next, samples = gathered.len(), "gathered");
            sample_labels.extend(std::iter::repeat(next).take(gathered.len()));
            samples.extend(gathered);
            labels.insert(next, &identity);
            next += 1;
        }

        if samples.len() < 2 {
            return unchanged(RollcallError::InsufficientTrainingData { accepted: samples.len() });
        }

        let mut model = match LbphModel::new(params) {
            Ok(model) => model,
            Err(e) => return unchanged(e),
        };
        if let Err(e) = model.train(&samples, &sample_labels) {
            return unchanged(e);
        }

        let identities = labels.len();
        let mut state = self.write_state();
        let generation = state.install(Arc::new(model), labels, preprocessor);
        state.training_root = Some(root.to_path_buf());
        tracing::info!(
            "Trained generation {} from {}: {} identities, {} samples",
            generation, root.display(), identities, samples.len()
        );
        TrainOutcome::Trained(TrainingSummary { generation, identities, samples: samples.len() })
    }

    pub fn update_incremental(&self, student_dir: &Path, identity: &str) -> TrainOutcome {
        self.update_incremental_cancellable(student_dir, identity, &CancelToken::new())
    }

    pub fn update_incremental_cancellable(
        &self,
        student_dir: &Path,
        identity: &str,
        cancel: &CancelToken,
    ) -> TrainOutcome {
        let _serial = self.serialize_lifecycle();

        let Some(current) = self.current() else {
            tracing::info!("Model untrained; incremental update of {} falls back to a full train", identity);
            return match student_dir.parent() {
                Some(root) => self.train_locked(root, cancel),
                None => unchanged(RollcallError::MissingTrainingDirectory(student_dir.to_path_buf())),
            };
        };

        if !student_dir.is_dir() {
            return unchanged(RollcallError::MissingTrainingDirectory(student_dir.to_path_buf()));
        }

        let (blur_threshold, augmentation, next_label) = {
            let state = self.read_state();
            (state.blur_threshold, state.augmentation.clone(), state.next_label)
        };
        let (label, is_new) = match current.labels.label(identity) {
            Some(existing) => (existing, false),
            None => (next_label, true),
        };

        let gatherer = SampleGatherer {
            gate: self.gate.as_ref(),
            augmenter: self.augmenter.as_ref(),
            augmentation: &augmentation,
            preprocessor: &current.preprocessor,
            blur_threshold,
            cancel,
        };
        let samples = match gatherer.gather(student_dir) {
            Ok(samples) => samples,
            Err(e) => return unchanged(e),
        };
        if samples.is_empty() {
            return unchanged(RollcallError::InsufficientTrainingData { accepted: 0 });
        }

        let mut model = LbphModel::clone(&current.model);
        if let Err(e) = model.update(&samples, &vec![label; samples.len()]) {
            return unchanged(e);
        }
        let mut labels = current.labels.clone();
        if is_new {
            labels.insert(label, identity);
        }

        let identities = labels.len();
        let generation = self
            .write_state()
            .install(Arc::new(model), labels, current.preprocessor.clone());
        tracing::info!(
            "Updated generation {}: {} (label {}{}) +{} samples",
            generation, identity, label, if is_new { ", new" } else { "" }, samples.len()
        );
        TrainOutcome::Trained(TrainingSummary { generation, identities, samples: samples.len() })
    }

    /// Forget an identity. The model cannot drop a label in place, so it is
    /// rebuilt from the training root (whose directory for this identity is
    /// expected to be gone), or discarded when no root is known.
    pub fn remove_student(&self, identity: &str) -> RemoveOutcome {
        let _serial = self.serialize_lifecycle();

        let Some(current) = self.current() else {
            return RemoveOutcome::NotEnrolled;
        };
        let mut labels = current.labels.clone();
        let Some(label) = labels.remove_identity(identity) else {
            tracing::debug!("Remove of {} ignored: not enrolled", identity);
            return RemoveOutcome::NotEnrolled;
        };

        let mut state = self.write_state();
        state.install(current.model.clone(), labels, current.preprocessor.clone());
        tracing::info!("Removed {} (label {})", identity, label);

        match state.training_root.clone() {
            Some(root) => {
                drop(state);
                RemoveOutcome::Retrained(self.train_locked(&root, &CancelToken::new()))
            }
            None => {
                state.trained = None;
                tracing::info!("No training root known; model discarded");
                RemoveOutcome::Untrained
            }
        }
    }

    /// Apply preprocessing, quality and LBPH settings. Always discards the
    /// trained model. Never fails: bad values fall back to defaults.
    pub fn configure_from(&self, config: &Config) {
        let _serial = self.serialize_lifecycle();
        let (params, preprocessor, blur_threshold) = sanitize(config);

        let mut state = self.write_state();
        let was_trained = state.trained.take().is_some();
        state.params = params;
        state.preprocessor = Arc::new(preprocessor);
        state.blur_threshold = blur_threshold;
        state.augmentation = config.augmentation.clone();
        if let Some(root) = &config.storage.training_root {
            state.training_root = Some(root.clone());
        }
        tracing::info!(?params, was_trained, "Recognizer reconfigured; model reset");
    }

    pub fn save_model(&self, dir: &Path) -> Result<()> {
        let current = self
            .current()
            .ok_or_else(|| RollcallError::Model("no trained model to save".into()))?;
        ModelStore::new(dir).save(&current.model, &current.labels)?;
        tracing::info!("Saved generation {} to {}", current.id, dir.display());
        Ok(())
    }

    /// Load a persisted model. The engine becomes trained whenever both
    /// artifacts parse; a label set that disagrees with the mapping is only
    /// reported, not rejected.
    pub fn load_model(&self, dir: &Path) -> Result<()> {
        let _serial = self.serialize_lifecycle();
        let (mut model, labels) = ModelStore::new(dir).load()?;

        let mut state = self.write_state();
        let model_labels = model.labels();
        let mapped: std::collections::BTreeSet<Label> = labels.iter().map(|(l, _)| l).collect();
        if model_labels != mapped {
            tracing::warn!(
                model = ?model_labels,
                mapping = ?mapped,
                "Loaded model labels do not match the label mapping"
            );
        }
        if model.sample_size() != Some(state.preprocessor.output_size()) {
            tracing::warn!(
                model = ?model.sample_size(),
                pipeline = ?state.preprocessor.output_size(),
                "Loaded model was trained with a different face size"
            );
        }
        if model.params().threshold != state.params.threshold {
            model.set_threshold(state.params.threshold);
        }

        let preprocessor = state.preprocessor.clone();
        let generation = state.install(Arc::new(model), labels, preprocessor);
        tracing::info!("Loaded generation {} from {}", generation, dir.display());
        Ok(())
    }
}

fn unchanged(reason: RollcallError) -> TrainOutcome {
    match &reason {
        RollcallError::Cancelled => tracing::warn!("Training cancelled; state unchanged"),
        _ => tracing::error!("Training skipped, state unchanged: {}", reason),
    }
    TrainOutcome::Unchanged(reason)
}

/// Derive engine settings from config, substituting defaults for anything
/// invalid and logging each substitution.
fn sanitize(config: &Config) -> (LbphParams, Preprocessor, f64) {
    let (params, mut fallbacks) = LbphParams::from_config(&config.recognizer);

    let defaults = PreprocessingConfig::default();
    let mut preprocessing = config.preprocessing.clone();
    if preprocessing.width == 0 || preprocessing.width > MAX_FACE_SIZE {
        fallbacks.push(RollcallError::ConfigurationFallback {
            key: "preprocessing.width",
            reason: format!("{} is outside 1..={}", preprocessing.width, MAX_FACE_SIZE),
        });
        preprocessing.width = defaults.width;
    }
    if preprocessing.height == 0 || preprocessing.height > MAX_FACE_SIZE {
        fallbacks.push(RollcallError::ConfigurationFallback {
            key: "preprocessing.height",
            reason: format!("{} is outside 1..={}", preprocessing.height, MAX_FACE_SIZE),
        });
        preprocessing.height = defaults.height;
    }

    let mut quality = config.quality.clone();
    for (key, value) in [
        ("quality.pre_capture_blur_threshold", &mut quality.pre_capture_blur_threshold),
        ("quality.post_capture_blur_threshold", &mut quality.post_capture_blur_threshold),
    ] {
        if !value.is_finite() || *value < 0.0 {
            fallbacks.push(RollcallError::ConfigurationFallback {
                key,
                reason: format!("{} is not a non-negative number", value),
            });
            *value = 0.0;
        }
    }

    for fallback in &fallbacks {
        tracing::warn!("{}", fallback);
    }

    (params, Preprocessor::from_config(&preprocessing), quality.training_threshold())
}
