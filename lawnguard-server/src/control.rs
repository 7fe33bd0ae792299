//! Control surface and inbound message shapes

use crate::config::PerformanceTargets;
use crate::health::HealthState;
use crate::supervisor::PerformanceReport;
use lawnguard_cns::SafetyStatus;
use lawnguard_eye::Frame;
use lawnguard_learn::{EnvironmentContext, FeedbackEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_recent_count() -> usize {
    100
}

fn default_override_kind() -> String {
    "manual".to_string()
}

/// Operator command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    Enable,
    Disable,
    HealthCheck,
    PerformanceReport {
        #[serde(default = "default_recent_count")]
        recent_count: usize,
    },
    /// Unset fields keep their current value
    ConfigureTargets {
        #[serde(default)]
        min_accuracy: Option<f64>,
        #[serde(default)]
        max_false_positive_rate: Option<f64>,
        #[serde(default)]
        max_latency_ms: Option<f64>,
    },
    OverrideEnable {
        #[serde(rename = "type", default = "default_override_kind")]
        kind: String,
        #[serde(default)]
        duration_seconds: Option<f64>,
    },
    OverrideDisable,
    ClearEmergencyStop,
}

impl ControlCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::Enable => "enable",
            ControlCommand::Disable => "disable",
            ControlCommand::HealthCheck => "health_check",
            ControlCommand::PerformanceReport { .. } => "performance_report",
            ControlCommand::ConfigureTargets { .. } => "configure_targets",
            ControlCommand::OverrideEnable { .. } => "override_enable",
            ControlCommand::OverrideDisable => "override_disable",
            ControlCommand::ClearEmergencyStop => "clear_emergency_stop",
        }
    }
}

/// Apply a partial target update
pub fn merge_targets(
    current: PerformanceTargets,
    min_accuracy: Option<f64>,
    max_false_positive_rate: Option<f64>,
    max_latency_ms: Option<f64>,
) -> PerformanceTargets {
    PerformanceTargets {
        min_accuracy: min_accuracy.unwrap_or(current.min_accuracy),
        max_false_positive_rate: max_false_positive_rate.unwrap_or(current.max_false_positive_rate),
        max_latency_ms: max_latency_ms.unwrap_or(current.max_latency_ms),
    }
}

/// Reply to a [`ControlCommand`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum ControlResponse {
    Ack {
        command: String,
        enabled: bool,
    },
    Health {
        status: HealthState,
        components: BTreeMap<String, String>,
    },
    Performance(PerformanceReport),
    Targets(PerformanceTargets),
    Safety(SafetyStatus),
    Error {
        command: String,
        message: String,
    },
}

/// One line of newline-delimited inbound JSON
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Frame(Frame),
    Feedback(FeedbackEvent),
    Environment(EnvironmentContext),
    Control(ControlCommand),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_commands() {
        let cmd: ControlCommand = serde_json::from_value(json!({
            "command": "override_enable",
            "type": "maintenance",
            "duration_seconds": 60
        }))
        .unwrap();
        assert_eq!(
            cmd,
            ControlCommand::OverrideEnable {
                kind: "maintenance".to_string(),
                duration_seconds: Some(60.0)
            }
        );

        let cmd: ControlCommand = serde_json::from_value(json!({"command": "performance_report"})).unwrap();
        assert_eq!(cmd, ControlCommand::PerformanceReport { recent_count: 100 });

        let cmd: ControlCommand = serde_json::from_value(json!({"command": "override_enable"})).unwrap();
        assert_eq!(cmd.name(), "override_enable");

        assert!(serde_json::from_value::<ControlCommand>(json!({"command": "self_destruct"})).is_err());
    }

    #[test]
    fn test_merge_targets() {
        let merged = merge_targets(PerformanceTargets::default(), None, Some(0.1), None);
        assert_eq!(merged.max_false_positive_rate, 0.1);
        assert_eq!(merged.min_accuracy, 0.95);
    }

    #[test]
    fn test_parse_inbound() {
        let inbound: Inbound = serde_json::from_value(json!({
            "type": "feedback",
            "origin": "false_positive",
            "detection_id": "toy-3-0",
            "object_type": "toy",
            "confidence": 0.7
        }))
        .unwrap();
        assert!(matches!(inbound, Inbound::Feedback(ref e) if e.origin == "false_positive"));

        let inbound: Inbound = serde_json::from_value(json!({
            "type": "frame",
            "id": 7,
            "captured_at": "2026-05-01T10:00:00Z",
            "width": 640,
            "height": 480,
            "annotations": [
                {"label": "person", "confidence": 0.9, "bbox": {"x": 10.0, "y": 20.0, "width": 50.0, "height": 120.0}}
            ]
        }))
        .unwrap();
        match inbound {
            Inbound::Frame(frame) => assert_eq!(frame.annotations.len(), 1),
            other => panic!("unexpected {:?}", other),
        }

        let inbound: Inbound = serde_json::from_value(json!({"type": "control", "command": "health_check"})).unwrap();
        assert!(matches!(inbound, Inbound::Control(ControlCommand::HealthCheck)));
    }

    #[test]
    fn test_response_shape() {
        let value = serde_json::to_value(ControlResponse::Ack {
            command: "enable".to_string(),
            enabled: true,
        })
        .unwrap();
        assert_eq!(value["response"], "ack");
        assert_eq!(value["enabled"], true);
    }
}
