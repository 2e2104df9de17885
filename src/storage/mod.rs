pub mod model_store;

pub use model_store::{ModelStore, LABELS_FILE, MODEL_FILE};
