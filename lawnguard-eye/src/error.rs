//! Error types for lawnguard-eye

use lawnguard_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Queue full: {0}")]
    QueueFull(String),

    #[error("Pipeline closed")]
    Closed,

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl From<VisionError> for CoreError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::Core(inner) => inner,
            other => CoreError::Vision(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vision_error_display() {
        let err = VisionError::Inference("backup detector offline".to_string());
        assert!(err.to_string().contains("Inference error"));
        assert!(err.to_string().contains("backup detector offline"));
    }

    #[test]
    fn test_vision_error_to_core_error() {
        let core_err: CoreError = VisionError::QueueFull("input".to_string()).into();
        match core_err {
            CoreError::Vision(msg) => assert!(msg.contains("input")),
            _ => panic!("Expected Vision error"),
        }
    }

    #[test]
    fn test_core_error_passes_through() {
        let vision_err: VisionError = CoreError::InvalidInput("nan".to_string()).into();
        let core_err: CoreError = vision_err.into();
        match core_err {
            CoreError::InvalidInput(msg) => assert_eq!(msg, "nan"),
            _ => panic!("Expected InvalidInput error"),
        }
    }
}
