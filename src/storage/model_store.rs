use crate::common::error::{RollcallError, Result};
use crate::core::labels::LabelMap;
use crate::core::lbph::LbphModel;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

pub const MODEL_FILE: &str = "model.bin";
pub const LABELS_FILE: &str = "labels.csv";

const STORAGE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct ModelEnvelope {
    version: u32,
    digest: Vec<u8>,
    payload: Vec<u8>,
}

/// A model directory: an opaque model blob next to a plain-text label table.
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn model_path(&self) -> PathBuf {
        self.dir.join(MODEL_FILE)
    }

    pub fn labels_path(&self) -> PathBuf {
        self.dir.join(LABELS_FILE)
    }

    pub fn exists(&self) -> bool {
        self.model_path().is_file() && self.labels_path().is_file()
    }

    pub fn save(&self, model: &LbphModel, labels: &LabelMap) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let payload = bincode::serialize(model)
            .map_err(|e| RollcallError::Storage(format!("Failed to serialize model: {}", e)))?;
        let envelope = ModelEnvelope {
            version: STORAGE_VERSION,
            digest: Sha256::digest(&payload).to_vec(),
            payload,
        };
        let encoded = bincode::serialize(&envelope)
            .map_err(|e| RollcallError::Storage(format!("Failed to serialize: {}", e)))?;

        write_replacing(&self.model_path(), &encoded)?;
        write_replacing(&self.labels_path(), labels.to_lines().as_bytes())?;
        Ok(())
    }

    pub fn load(&self) -> Result<(LbphModel, LabelMap)> {
        let model_path = self.model_path();
        let labels_path = self.labels_path();
        for path in [&model_path, &labels_path] {
            if !path.is_file() {
                return Err(RollcallError::Storage(format!("Missing model artifact: {}", path.display())));
            }
        }

        let data = fs::read(&model_path)?;
        let envelope: ModelEnvelope = bincode::deserialize(&data)
            .map_err(|e| RollcallError::Storage(format!("Failed to deserialize: {}", e)))?;
        if envelope.version > STORAGE_VERSION {
            return Err(RollcallError::Storage(format!(
                "Model format version {} is newer than supported {}",
                envelope.version, STORAGE_VERSION
            )));
        }
        if Sha256::digest(&envelope.payload).as_slice() != envelope.digest.as_slice() {
            return Err(RollcallError::Storage(format!(
                "Checksum mismatch in {}", model_path.display()
            )));
        }
        let model: LbphModel = bincode::deserialize(&envelope.payload)
            .map_err(|e| RollcallError::Storage(format!("Failed to deserialize model: {}", e)))?;
        model
            .validate()
            .map_err(|e| RollcallError::Storage(format!("Invalid model in {}: {}", model_path.display(), e)))?;

        let text = fs::read_to_string(&labels_path)?;
        let (labels, skipped) = LabelMap::parse_lines(&text);
        for problem in &skipped {
            tracing::warn!("{}: {}", labels_path.display(), problem);
        }

        Ok((model, labels))
    }

    /// Delete both artifacts. Missing files are fine.
    pub fn clear(&self) -> Result<()> {
        for path in [self.model_path(), self.labels_path()] {
            match fs::remove_file(&path) {
                Ok(()) => tracing::info!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Write through a sibling temp file so a crash never leaves half a file.
fn write_replacing(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
