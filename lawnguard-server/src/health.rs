//! Health composition for the lawnguard runtime

use lawnguard_cns::SafetyStatus;
use lawnguard_eye::PipelineStatsSnapshot;
use lawnguard_learn::LearningStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Overall system health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Adapting,
    OverrideActive,
    Error,
    Disabled,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Adapting => "adapting",
            HealthState::OverrideActive => "override_active",
            HealthState::Error => "error",
            HealthState::Disabled => "disabled",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-component observations gathered at a health tick
#[derive(Debug, Clone)]
pub struct HealthInputs {
    pub enabled: bool,
    pub stale: bool,
    pub recent_violations: bool,
    pub pipeline: PipelineStatsSnapshot,
    /// Frames or results dropped since the previous health tick
    pub pipeline_pressure: bool,
    pub learning: LearningStatus,
    pub safety: SafetyStatus,
}

/// Compose sub-component statuses into one overall status
pub fn compose_health(inputs: &HealthInputs) -> (HealthState, BTreeMap<String, String>) {
    let mut components = BTreeMap::new();

    let pipeline = if inputs.stale {
        "stale"
    } else if inputs.pipeline_pressure {
        "degraded"
    } else {
        "ok"
    };
    components.insert("pipeline".to_string(), pipeline.to_string());

    let learning_degraded = inputs.learning.persistence_failures > 0;
    let learning = if inputs.learning.adapting {
        "adapting"
    } else if learning_degraded {
        "degraded"
    } else {
        "ok"
    };
    components.insert("learning".to_string(), learning.to_string());

    let safety_error = inputs.safety.last_actuation_error.is_some();
    let safety = if safety_error {
        "error".to_string()
    } else if inputs.safety.override_active {
        "override_active".to_string()
    } else {
        inputs.safety.current_tier.to_string().to_lowercase()
    };
    components.insert("safety".to_string(), safety);

    let performance = if inputs.recent_violations { "violations" } else { "ok" };
    components.insert("performance".to_string(), performance.to_string());
    components.insert(
        "supervisor".to_string(),
        if inputs.enabled { "enabled" } else { "disabled" }.to_string(),
    );

    let state = if !inputs.enabled {
        HealthState::Disabled
    } else if safety_error {
        HealthState::Error
    } else if inputs.safety.override_active {
        HealthState::OverrideActive
    } else if inputs.learning.adapting {
        HealthState::Adapting
    } else if inputs.stale || inputs.pipeline_pressure || inputs.recent_violations || learning_degraded {
        HealthState::Degraded
    } else {
        HealthState::Healthy
    };

    (state, components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lawnguard_core::ResponseTier;

    fn inputs() -> HealthInputs {
        HealthInputs {
            enabled: true,
            stale: false,
            recent_violations: false,
            pipeline: PipelineStatsSnapshot::default(),
            pipeline_pressure: false,
            learning: LearningStatus::default(),
            safety: SafetyStatus::default(),
        }
    }

    #[test]
    fn test_healthy() {
        let (state, components) = compose_health(&inputs());
        assert_eq!(state, HealthState::Healthy);
        assert_eq!(components["safety"], "continue");
        assert_eq!(components.len(), 5);
    }

    #[test]
    fn test_precedence() {
        let mut i = inputs();
        i.stale = true;
        assert_eq!(compose_health(&i).0, HealthState::Degraded);

        i.learning.adapting = true;
        assert_eq!(compose_health(&i).0, HealthState::Adapting);

        i.safety.override_active = true;
        assert_eq!(compose_health(&i).0, HealthState::OverrideActive);

        i.safety.last_actuation_error = Some("Emergency stop failed".to_string());
        assert_eq!(compose_health(&i).0, HealthState::Error);

        i.enabled = false;
        assert_eq!(compose_health(&i).0, HealthState::Disabled);
    }

    #[test]
    fn test_safety_component_reports_tier() {
        let mut i = inputs();
        i.safety.current_tier = ResponseTier::StopAndAssess;
        let (state, components) = compose_health(&i);
        assert_eq!(state, HealthState::Healthy);
        assert_eq!(components["safety"], "stop_and_assess");
    }
}
