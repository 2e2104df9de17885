pub mod augment;
pub mod frame_processor;
pub mod geometry;
pub mod labels;
pub mod lbph;
pub mod preprocess;
pub mod quality;
pub mod recognizer;
pub mod tracker;
pub mod training;

pub use augment::{BasicAugmenter, SampleAugmenter};
pub use frame_processor::{FrameProcessor, RecognitionEvent};
pub use geometry::BoundingBox;
pub use labels::LabelMap;
pub use lbph::{Label, LbphModel, LbphParams};
pub use preprocess::Preprocessor;
pub use quality::{laplacian_variance, LaplacianVarianceGate, QualityGate};
pub use recognizer::{
    Prediction, RecognizerEngine, RemoveOutcome, TrainOutcome, TrainingSummary, UNKNOWN_IDENTITY,
};
pub use tracker::{FaceTracker, Track, TrackId};
pub use training::CancelToken;
