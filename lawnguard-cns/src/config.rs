//! Configuration for lawnguard-cns

use serde::{Deserialize, Serialize};

/// Safety response configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Active response supervision rate
    pub supervision_hz: u32,
    /// Manual override duration when none is given, in seconds
    pub default_override_secs: u64,
    /// A response clears beyond `required_clearance_m * clearance_factor`
    pub clearance_factor: f64,
    /// Floor applied to distance when ranking detections
    pub min_rank_distance_m: f64,
    /// Speed factor sent with a slow-down command
    pub slow_down_speed_factor: f64,
    /// Bounded command queue capacity of the safety service
    pub command_capacity: usize,
    /// Timeout for non-emergency actuation publishes, in milliseconds
    pub action_timeout_ms: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            supervision_hz: 10,
            default_override_secs: 300,
            clearance_factor: 1.2,
            min_rank_distance_m: 0.1,
            slow_down_speed_factor: 0.5,
            command_capacity: 64,
            action_timeout_ms: 1000,
        }
    }
}

impl SafetyConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.supervision_hz == 0 || self.supervision_hz > 1000 {
            return Err("supervision_hz must be between 1 and 1000".to_string());
        }

        if self.default_override_secs == 0 {
            return Err("default_override_secs must be > 0".to_string());
        }

        if self.clearance_factor < 1.0 {
            return Err("clearance_factor must be >= 1.0".to_string());
        }

        if !(self.min_rank_distance_m > 0.0) {
            return Err("min_rank_distance_m must be > 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.slow_down_speed_factor) {
            return Err("slow_down_speed_factor must be between 0.0 and 1.0".to_string());
        }

        if self.command_capacity == 0 {
            return Err("command_capacity must be > 0".to_string());
        }

        if self.action_timeout_ms == 0 {
            return Err("action_timeout_ms must be > 0".to_string());
        }

        Ok(())
    }

    pub fn supervision_period(&self) -> std::time::Duration {
        std::time::Duration::from_micros(1_000_000 / self.supervision_hz as u64)
    }
}
