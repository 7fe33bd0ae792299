//! Error types for lawnguard-cns

use lawnguard_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CnsError {
    #[error("Actuation error: {0}")]
    Actuation(String),

    #[error("Emergency stop failed: {0}")]
    EmergencyStop(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Safety service closed")]
    Closed,
}

impl From<CnsError> for CoreError {
    fn from(err: CnsError) -> Self {
        CoreError::Safety(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(CnsError::Timeout(100).to_string(), "Timed out after 100ms");
        let err = CnsError::EmergencyStop("bus down".to_string());
        assert_eq!(err.to_string(), "Emergency stop failed: bus down");
    }

    #[test]
    fn test_into_core_error() {
        let core: CoreError = CnsError::Closed.into();
        assert!(matches!(core, CoreError::Safety(_)));
    }
}
