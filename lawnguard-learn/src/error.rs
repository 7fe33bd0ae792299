//! Error types for lawnguard-learn

use lawnguard_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LearningError {
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Learning service closed")]
    Closed,
}

impl From<LearningError> for CoreError {
    fn from(err: LearningError) -> Self {
        match err {
            LearningError::Io(e) => CoreError::Io(e),
            other => CoreError::Learning(other.to_string()),
        }
    }
}
