//! Configuration for lawnguard-eye

use serde::{Deserialize, Serialize};

/// Temporal consistency filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    /// Ring capacity of recent confidences per key
    pub window_size: usize,
    /// Samples needed before a window is evaluated
    pub min_samples: usize,
    /// Window mean must exceed this
    pub min_mean_confidence: f64,
    /// Window standard deviation must stay below this
    pub max_stddev: f64,
    /// Confirmations needed before emission
    pub required_confirmations: u32,
    /// Edge length of the coarse spatial bucket, in pixels
    pub bucket_size_px: f64,
    /// Inactive keys are evicted after this many seconds
    pub eviction_secs: f64,
    /// Multiplier applied to confirmed confidences (result capped at 1.0)
    pub confidence_boost: f64,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            min_samples: 3,
            min_mean_confidence: 0.6,
            max_stddev: 0.3,
            required_confirmations: 2,
            bucket_size_px: 64.0,
            eviction_secs: 10.0,
            confidence_boost: 1.1,
        }
    }
}

/// Detection pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bounded frame queue capacity
    pub input_capacity: usize,
    /// Bounded result queue capacity
    pub output_capacity: usize,
    /// Per-cycle latency target in milliseconds
    pub latency_target_ms: f64,
    /// IoU above which detections from different sources are merged
    pub fusion_iou_threshold: f64,
    /// Capacity of the critical bypass channel
    pub critical_capacity: usize,
    /// Temporal filter settings
    pub temporal: TemporalConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_capacity: 5,
            output_capacity: 10,
            latency_target_ms: 100.0,
            fusion_iou_threshold: 0.30,
            critical_capacity: 16,
            temporal: TemporalConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.input_capacity == 0 {
            return Err("input_capacity must be > 0".to_string());
        }

        if self.output_capacity == 0 {
            return Err("output_capacity must be > 0".to_string());
        }

        if self.critical_capacity == 0 {
            return Err("critical_capacity must be > 0".to_string());
        }

        if !(self.latency_target_ms > 0.0) {
            return Err("latency_target_ms must be > 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.fusion_iou_threshold) {
            return Err("fusion_iou_threshold must be between 0.0 and 1.0".to_string());
        }

        let temporal = &self.temporal;
        if temporal.window_size == 0 || temporal.min_samples == 0 {
            return Err("temporal window_size and min_samples must be > 0".to_string());
        }

        if temporal.min_samples > temporal.window_size {
            return Err("temporal min_samples cannot exceed window_size".to_string());
        }

        if !(temporal.bucket_size_px > 0.0) {
            return Err("temporal bucket_size_px must be > 0".to_string());
        }

        if !(temporal.eviction_secs > 0.0) {
            return Err("temporal eviction_secs must be > 0".to_string());
        }

        if temporal.confidence_boost < 1.0 {
            return Err("temporal confidence_boost must be >= 1.0".to_string());
        }

        Ok(())
    }
}
