//! Durable learning state

use crate::adjustment::AdjustmentEntry;
use crate::environment::EnvironmentRecord;
use crate::error::LearningError;
use crate::feedback::LearningExample;
use crate::metrics::ModelPerformanceMetrics;
use lawnguard_core::ObjectCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Everything the learning system persists, loaded and rewritten wholesale
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningSnapshot {
    pub examples: Vec<LearningExample>,
    pub environment_history: Vec<EnvironmentRecord>,
    pub metrics: BTreeMap<ObjectCategory, ModelPerformanceMetrics>,
    #[serde(default)]
    pub global_metrics: Option<ModelPerformanceMetrics>,
    #[serde(default)]
    pub adjustments: Vec<AdjustmentEntry>,
}

/// Storage backend for [`LearningSnapshot`]s
pub trait LearningStore: Send + Sync {
    /// Load the last saved snapshot, `None` if nothing was saved yet
    fn load(&self) -> Result<Option<LearningSnapshot>, LearningError>;

    fn save(&self, snapshot: &LearningSnapshot) -> Result<(), LearningError>;
}

/// Single JSON file, replaced atomically on every save
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "learning_state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LearningStore for JsonFileStore {
    fn load(&self) -> Result<Option<LearningSnapshot>, LearningError> {
        if !self.path.exists() {
            debug!("No learning state at {}", self.path.display());
            return Ok(None);
        }

        let data = fs::read(&self.path)?;
        let snapshot: LearningSnapshot = serde_json::from_slice(&data)?;
        info!(
            "Loaded learning state: {} examples, {} adjustments",
            snapshot.examples.len(),
            snapshot.adjustments.len()
        );
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &LearningSnapshot) -> Result<(), LearningError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let data = serde_json::to_vec(snapshot)?;
        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)
            .map_err(|e| LearningError::Persistence(format!("replace {}: {}", self.path.display(), e)))?;

        debug!("Saved learning state ({} bytes) to {}", data.len(), self.path.display());
        Ok(())
    }
}
