//! Configuration for the lawnguard runtime

use lawnguard_cns::SafetyConfig;
use lawnguard_eye::PipelineConfig;
use lawnguard_learn::LearningConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid {section} config: {message}")]
    Invalid { section: &'static str, message: String },
}

impl From<ConfigError> for lawnguard_core::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io(e) => lawnguard_core::Error::Io(e),
            other => lawnguard_core::Error::Configuration(other.to_string()),
        }
    }
}

/// How learning adjustments are applied to live detections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentMode {
    /// Accept iff `confidence >= threshold + adjustment`; confidence is untouched
    #[default]
    ThresholdOnly,
    /// Compare `confidence - adjustment` against `threshold + adjustment` and
    /// forward the lowered confidence
    LegacyDouble,
}

/// System-wide performance targets
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceTargets {
    pub min_accuracy: f64,
    pub max_false_positive_rate: f64,
    pub max_latency_ms: f64,
}

impl Default for PerformanceTargets {
    fn default() -> Self {
        Self {
            min_accuracy: 0.95,
            max_false_positive_rate: 0.05,
            max_latency_ms: 100.0,
        }
    }
}

impl PerformanceTargets {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.min_accuracy) {
            return Err("min_accuracy must be between 0.0 and 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.max_false_positive_rate) {
            return Err("max_false_positive_rate must be between 0.0 and 1.0".to_string());
        }
        if !(self.max_latency_ms > 0.0) {
            return Err("max_latency_ms must be > 0".to_string());
        }
        Ok(())
    }
}

/// Integration & health supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Base acceptance threshold for live detections
    pub global_threshold: f64,
    pub targets: PerformanceTargets,
    /// Rolling performance history capacity
    pub history_capacity: usize,
    pub monitor_interval_secs: u64,
    pub health_interval_secs: u64,
    /// No pipeline activity for this long marks the system stale
    pub stale_after_secs: u64,
    /// Drop in rolling accuracy that requests re-adaptation
    pub accuracy_drop_threshold: f64,
    /// Samples in each of the two compared accuracy windows
    pub accuracy_drop_window: usize,
    pub adjustment_mode: AdjustmentMode,
    /// Bounded control queue capacity
    pub command_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            global_threshold: 0.5,
            targets: PerformanceTargets::default(),
            history_capacity: 1000,
            monitor_interval_secs: 10,
            health_interval_secs: 30,
            stale_after_secs: 60,
            accuracy_drop_threshold: 0.05,
            accuracy_drop_window: 5,
            adjustment_mode: AdjustmentMode::ThresholdOnly,
            command_capacity: 32,
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.global_threshold) {
            return Err("global_threshold must be between 0.0 and 1.0".to_string());
        }
        self.targets.validate()?;
        if self.history_capacity == 0 {
            return Err("history_capacity must be > 0".to_string());
        }
        if self.monitor_interval_secs == 0 || self.health_interval_secs == 0 {
            return Err("monitor and health intervals must be > 0".to_string());
        }
        if self.accuracy_drop_window == 0 || self.accuracy_drop_window * 2 > self.history_capacity {
            return Err("accuracy_drop_window must be > 0 and fit twice in the history".to_string());
        }
        if self.command_capacity == 0 {
            return Err("command_capacity must be > 0".to_string());
        }
        Ok(())
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub pipeline: PipelineConfig,
    pub learning: LearningConfig,
    pub safety: SafetyConfig,
    pub supervisor: SupervisorConfig,
}

impl GuardConfig {
    /// Load from a `.toml`, `.yaml` or `.yml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let config = match extension.as_str() {
            "toml" => Self::from_toml_str(&contents)?,
            "yaml" | "yml" => Self::from_yaml_str(&contents)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |section: &'static str| move |message: String| ConfigError::Invalid { section, message };
        self.pipeline.validate().map_err(invalid("pipeline"))?;
        self.learning.validate().map_err(invalid("learning"))?;
        self.safety.validate().map_err(invalid("safety"))?;
        self.supervisor.validate().map_err(invalid("supervisor"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = GuardConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.supervisor.global_threshold, 0.5);
        assert_eq!(config.supervisor.targets.min_accuracy, 0.95);
        assert_eq!(config.supervisor.adjustment_mode, AdjustmentMode::ThresholdOnly);
    }

    #[test]
    fn test_partial_toml() {
        let config = GuardConfig::from_toml_str(
            r#"
            [safety]
            default_override_secs = 120

            [supervisor]
            adjustment_mode = "legacy_double"

            [supervisor.targets]
            max_latency_ms = 80.0
            "#,
        )
        .unwrap();
        assert_eq!(config.safety.default_override_secs, 120);
        assert_eq!(config.safety.supervision_hz, 10);
        assert_eq!(config.supervisor.adjustment_mode, AdjustmentMode::LegacyDouble);
        assert_eq!(config.supervisor.targets.max_latency_ms, 80.0);
        assert_eq!(config.supervisor.targets.min_accuracy, 0.95);
    }

    #[test]
    fn test_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "pipeline:\n  input_capacity: 3\nlearning:\n  max_examples: 500").unwrap();
        let config = GuardConfig::from_file(file.path()).unwrap();
        assert_eq!(config.pipeline.input_capacity, 3);
        assert_eq!(config.learning.max_examples, 500);
    }

    #[test]
    fn test_invalid_section_named() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[supervisor]\nglobal_threshold = 1.5").unwrap();
        let err = GuardConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("supervisor"));
    }

    #[test]
    fn test_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            GuardConfig::from_file(file.path()),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
