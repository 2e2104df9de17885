pub mod camera;
pub mod common;
pub mod core;
pub mod storage;

pub use camera::{DeviceLock, FrameSource, ImageSequence};
pub use common::{Config, DevMode, Result, RollcallError};
pub use core::{
    BoundingBox, CancelToken, FaceTracker, FrameProcessor, Prediction, RecognitionEvent,
    RecognizerEngine, RemoveOutcome, TrainOutcome, TrackId,
};
pub use storage::ModelStore;
