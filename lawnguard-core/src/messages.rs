//! Outbound message catalogue.
//!
//! Topic strings are part of the wire contract with the existing web/UI layer
//! and must not change.

use crate::types::{Detection, ResponseTier, SafetyLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;

pub const TOPIC_ML_ALERT: &str = "safety/ml_alert";
pub const TOPIC_EMERGENCY_STOP: &str = "safety/emergency_stop";
pub const TOPIC_NAV_STOP: &str = "navigation/stop";
pub const TOPIC_NAV_SET_SPEED: &str = "navigation/set_speed";
pub const TOPIC_NAV_RETREAT: &str = "navigation/retreat";
pub const TOPIC_NAV_RESUME: &str = "navigation/resume";
pub const TOPIC_DETECTION_RESULTS: &str = "ml_detection/results";
pub const TOPIC_PERFORMANCE_ALERT: &str = "ml_detection/performance_alert";
pub const TOPIC_HEALTH_STATUS: &str = "ml_detection/health_status";

/// Discrete, independently consumable outbound message
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    MlAlert {
        detection: Detection,
        response: ResponseTier,
        clearance_m: f64,
    },
    EmergencyStop {
        reason: String,
        severity: SafetyLevel,
        timeout_ms: u64,
    },
    NavigationStop {
        reason: String,
        detection_id: Option<String>,
    },
    NavigationSetSpeed {
        speed_factor: f64,
        reason: String,
    },
    NavigationRetreat {
        distance_m: f64,
        reason: String,
    },
    NavigationResume {
        reason: String,
    },
    DetectionResults {
        frame_id: u64,
        detections: Vec<Detection>,
        latency_ms: f64,
    },
    PerformanceAlert {
        violations: Vec<String>,
        accuracy: f64,
        false_positive_rate: f64,
        latency_ms: f64,
    },
    HealthStatus {
        status: String,
        components: BTreeMap<String, String>,
        timestamp: DateTime<Utc>,
    },
}

impl OutboundMessage {
    pub fn topic(&self) -> &'static str {
        match self {
            OutboundMessage::MlAlert { .. } => TOPIC_ML_ALERT,
            OutboundMessage::EmergencyStop { .. } => TOPIC_EMERGENCY_STOP,
            OutboundMessage::NavigationStop { .. } => TOPIC_NAV_STOP,
            OutboundMessage::NavigationSetSpeed { .. } => TOPIC_NAV_SET_SPEED,
            OutboundMessage::NavigationRetreat { .. } => TOPIC_NAV_RETREAT,
            OutboundMessage::NavigationResume { .. } => TOPIC_NAV_RESUME,
            OutboundMessage::DetectionResults { .. } => TOPIC_DETECTION_RESULTS,
            OutboundMessage::PerformanceAlert { .. } => TOPIC_PERFORMANCE_ALERT,
            OutboundMessage::HealthStatus { .. } => TOPIC_HEALTH_STATUS,
        }
    }

    pub fn is_emergency_stop(&self) -> bool {
        matches!(self, OutboundMessage::EmergencyStop { .. })
    }

    /// JSON body published on [`OutboundMessage::topic`]
    pub fn payload(&self) -> JsonValue {
        match self {
            OutboundMessage::MlAlert {
                detection,
                response,
                clearance_m,
            } => json!({
                "detection": detection,
                "response": response,
                "clearance_distance": clearance_m,
                "motion_vector": detection.motion_vector,
                "trajectory": detection.trajectory.as_ref().map(|t| t.points().to_vec()),
            }),
            OutboundMessage::EmergencyStop {
                reason,
                severity,
                timeout_ms,
            } => json!({
                "reason": reason,
                "severity": severity,
                "timeout_ms": timeout_ms,
            }),
            OutboundMessage::NavigationStop {
                reason,
                detection_id,
            } => json!({
                "reason": reason,
                "detection_id": detection_id,
            }),
            OutboundMessage::NavigationSetSpeed {
                speed_factor,
                reason,
            } => json!({
                "speed_factor": speed_factor,
                "reason": reason,
            }),
            OutboundMessage::NavigationRetreat { distance_m, reason } => json!({
                "distance": distance_m,
                "reason": reason,
            }),
            OutboundMessage::NavigationResume { reason } => json!({
                "reason": reason,
            }),
            OutboundMessage::DetectionResults {
                frame_id,
                detections,
                latency_ms,
            } => json!({
                "frame_id": frame_id,
                "detections": detections,
                "count": detections.len(),
                "latency_ms": latency_ms,
            }),
            OutboundMessage::PerformanceAlert {
                violations,
                accuracy,
                false_positive_rate,
                latency_ms,
            } => json!({
                "violations": violations,
                "accuracy": accuracy,
                "false_positive_rate": false_positive_rate,
                "latency_ms": latency_ms,
            }),
            OutboundMessage::HealthStatus {
                status,
                components,
                timestamp,
            } => json!({
                "status": status,
                "components": components,
                "timestamp": timestamp,
            }),
        }
    }

    pub fn envelope(&self) -> Envelope {
        Envelope {
            topic: self.topic().to_string(),
            payload: self.payload(),
        }
    }
}

/// Topic plus JSON body, the shape handed to the message bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub payload: JsonValue,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, ObjectCategory};

    #[test]
    fn test_topics_are_wire_stable() {
        let resume = OutboundMessage::NavigationResume {
            reason: "clear".to_string(),
        };
        assert_eq!(resume.topic(), "navigation/resume");

        let estop = OutboundMessage::EmergencyStop {
            reason: "person".to_string(),
            severity: SafetyLevel::Critical,
            timeout_ms: 100,
        };
        assert_eq!(estop.topic(), "safety/emergency_stop");
        assert!(estop.is_emergency_stop());
        assert_eq!(estop.payload()["severity"], "CRITICAL");
    }

    #[test]
    fn test_ml_alert_payload() {
        let detection = Detection::new("obj-1", ObjectCategory::Dog, 0.8, BoundingBox::new(0.0, 0.0, 10.0, 10.0), 4.0);
        let msg = OutboundMessage::MlAlert {
            detection,
            response: ResponseTier::SlowDown,
            clearance_m: 3.0,
        };
        let envelope = msg.envelope();
        assert_eq!(envelope.topic, "safety/ml_alert");
        assert_eq!(envelope.payload["response"], "SLOW_DOWN");
        assert_eq!(envelope.payload["clearance_distance"], 3.0);
        assert_eq!(envelope.payload["detection"]["category"], "dog");
        assert!(envelope.payload["trajectory"].is_null());
    }
}
