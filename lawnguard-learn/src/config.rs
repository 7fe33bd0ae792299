//! Configuration for lawnguard-learn

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How feedback from an unrecognised origin is classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownOriginPolicy {
    /// Record as `UNKNOWN`, excluded from metrics
    #[default]
    Unknown,
    /// Record as `CORRECT_DETECTION` (compatibility with older feedback producers)
    CorrectDetection,
}

/// Adaptive learning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Maximum retained learning examples (oldest dropped)
    pub max_examples: usize,
    /// Examples considered by a metrics recompute
    pub metrics_window: usize,
    /// Examples required before the periodic recompute runs
    pub min_examples_for_update: usize,
    /// Periodic recompute interval in seconds
    pub update_interval_secs: u64,
    /// Environment adaptation and decay interval in seconds
    pub environment_interval_secs: u64,
    /// Persist after this many appended examples
    pub flush_every: usize,
    /// State file; `None` keeps learning in memory only
    pub storage_path: Option<PathBuf>,
    /// Per-tick multiplicative decay of every adjustment
    pub decay_factor: f64,
    /// Adjustments smaller than this snap to zero
    pub snap_threshold: f64,
    /// Look-back for the repeated-error trigger
    pub trigger_window: usize,
    /// Same-category errors within the look-back that trigger adaptation
    pub trigger_count: usize,
    /// User corrections above this reported confidence trigger adaptation
    pub user_correction_confidence: f64,
    /// Classification of unrecognised feedback origins
    pub unknown_origin: UnknownOriginPolicy,
    /// False-positive rate above which an adjustment is raised
    pub high_fpr: f64,
    /// False-positive rate below which an adjustment is lowered
    pub low_fpr: f64,
    /// Global per-category step up
    pub global_step_up: f64,
    /// Global per-category step down
    pub global_step_down: f64,
    /// Environment-scoped step up
    pub environment_step_up: f64,
    /// Environment-scoped step down
    pub environment_step_down: f64,
    /// Magnitude cap of any single stored adjustment
    pub max_adjustment: f64,
    /// Weight of the environment adjustment in a query
    pub environment_weight: f64,
    /// Magnitude cap of a query result
    pub max_query_adjustment: f64,
    /// Environment false-positive rate that forces an environment pass
    pub environment_fpr_trigger: f64,
    /// Same-environment examples needed for that rate to count
    pub environment_min_examples: usize,
    /// Minimum gap between rate-triggered environment passes, in seconds
    pub environment_cooldown_secs: i64,
    /// Seconds after an adaptation pass during which the service reports itself adapting
    pub adapting_window_secs: i64,
    /// Relative change of a numeric environment field that counts as significant
    pub significant_change_ratio: f64,
    /// Significant changes needed for an environment pass
    pub significant_changes_required: usize,
    /// Retained environment snapshots
    pub environment_history: usize,
    /// Recently published detections kept for feedback lookup
    pub detection_cache_size: usize,
    /// Frame area used for the box size ratio feature
    pub reference_frame_area: f64,
    /// Bounded command queue capacity of the learning service
    pub command_capacity: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            max_examples: 10_000,
            metrics_window: 1_000,
            min_examples_for_update: 100,
            update_interval_secs: 10,
            environment_interval_secs: 30,
            flush_every: 100,
            storage_path: None,
            decay_factor: 0.95,
            snap_threshold: 0.01,
            trigger_window: 50,
            trigger_count: 3,
            user_correction_confidence: 0.8,
            unknown_origin: UnknownOriginPolicy::Unknown,
            high_fpr: 0.05,
            low_fpr: 0.02,
            global_step_up: 0.05,
            global_step_down: 0.025,
            environment_step_up: 0.10,
            environment_step_down: 0.05,
            max_adjustment: 0.30,
            environment_weight: 0.3,
            max_query_adjustment: 0.5,
            environment_fpr_trigger: 0.10,
            environment_min_examples: 10,
            environment_cooldown_secs: 300,
            adapting_window_secs: 5,
            significant_change_ratio: 0.20,
            significant_changes_required: 2,
            environment_history: 100,
            detection_cache_size: 500,
            reference_frame_area: 640.0 * 480.0,
            command_capacity: 256,
        }
    }
}

impl LearningConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_examples == 0 || self.metrics_window == 0 {
            return Err("max_examples and metrics_window must be > 0".to_string());
        }

        if self.update_interval_secs == 0 || self.environment_interval_secs == 0 {
            return Err("update intervals must be > 0".to_string());
        }

        if self.adapting_window_secs < 0 {
            return Err("adapting_window_secs must be >= 0".to_string());
        }

        if self.flush_every == 0 {
            return Err("flush_every must be > 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.decay_factor) {
            return Err("decay_factor must be between 0.0 and 1.0".to_string());
        }

        if self.low_fpr > self.high_fpr {
            return Err("low_fpr cannot exceed high_fpr".to_string());
        }

        if !(self.max_adjustment > 0.0) || !(self.max_query_adjustment > 0.0) {
            return Err("adjustment caps must be > 0".to_string());
        }

        if self.trigger_count == 0 || self.trigger_window == 0 {
            return Err("trigger_window and trigger_count must be > 0".to_string());
        }

        if self.detection_cache_size == 0 || self.command_capacity == 0 {
            return Err("detection_cache_size and command_capacity must be > 0".to_string());
        }

        if !(self.reference_frame_area > 0.0) {
            return Err("reference_frame_area must be > 0".to_string());
        }

        Ok(())
    }
}
