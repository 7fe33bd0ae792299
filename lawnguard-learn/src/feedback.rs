//! Feedback events and the learning examples derived from them

use crate::config::UnknownOriginPolicy;
use crate::environment::EnvironmentContext;
use chrono::{DateTime, Utc};
use lawnguard_core::{BoundingBox, Detection, ObjectCategory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a feedback event says about a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackKind {
    CorrectDetection,
    FalsePositive,
    MissedDetection,
    UserCorrection,
    EnvironmentChange,
    /// Origin not recognised; carries no ground truth
    Unknown,
}

impl FeedbackKind {
    /// Classify a feedback origin (channel name, optionally topic-prefixed)
    pub fn from_origin(origin: &str, policy: UnknownOriginPolicy) -> Self {
        let channel = origin.rsplit('/').next().unwrap_or(origin);
        match channel.trim().to_ascii_lowercase().as_str() {
            "user_feedback" | "user_correction" => FeedbackKind::UserCorrection,
            "detection_feedback" | "correct_detection" => FeedbackKind::CorrectDetection,
            "environment_change" => FeedbackKind::EnvironmentChange,
            "false_positive" | "false_positive_report" => FeedbackKind::FalsePositive,
            "missed_detection" | "missed_detection_report" => FeedbackKind::MissedDetection,
            _ => match policy {
                UnknownOriginPolicy::Unknown => FeedbackKind::Unknown,
                UnknownOriginPolicy::CorrectDetection => FeedbackKind::CorrectDetection,
            },
        }
    }

    /// Kinds counted by the repeated-error trigger
    pub fn is_error_report(&self) -> bool {
        matches!(self, FeedbackKind::FalsePositive | FeedbackKind::MissedDetection)
    }
}

/// Inbound feedback as received on one of the feedback channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    /// Channel the event arrived on, e.g. `false_positive`
    pub origin: String,
    pub detection_id: String,
    pub object_type: String,
    pub confidence: f64,
    #[serde(default)]
    pub correct_type: Option<String>,
    #[serde(default)]
    pub user_comment: Option<String>,
    /// Environment reported alongside the event, if any
    #[serde(default)]
    pub environment: Option<EnvironmentContext>,
}

impl FeedbackEvent {
    pub fn new(origin: impl Into<String>, detection_id: impl Into<String>, object_type: impl Into<String>, confidence: f64) -> Self {
        Self {
            origin: origin.into(),
            detection_id: detection_id.into(),
            object_type: object_type.into(),
            confidence,
            correct_type: None,
            user_comment: None,
            environment: None,
        }
    }

    pub fn with_correct_type(mut self, correct_type: impl Into<String>) -> Self {
        self.correct_type = Some(correct_type.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.user_comment = Some(comment.into());
        self
    }

    pub fn with_environment(mut self, environment: EnvironmentContext) -> Self {
        self.environment = Some(environment);
        self
    }
}

/// Labelled truth for one example
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "category", rename_all = "snake_case")]
pub enum GroundTruth {
    Present(ObjectCategory),
    Absent,
}

/// How an example scores against its ground truth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    TruePositive,
    FalsePositive,
    FalseNegative,
    TrueNegative,
}

/// One labelled observation in the learning history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningExample {
    pub example_id: String,
    pub timestamp: DateTime<Utc>,
    pub detection_id: String,
    pub category: ObjectCategory,
    pub confidence: f64,
    pub bounding_box: BoundingBox,
    pub features: BTreeMap<String, f64>,
    /// Whether the system reported the object at all
    pub detected: bool,
    pub ground_truth: Option<GroundTruth>,
    pub feedback_kind: FeedbackKind,
    pub environment_context: EnvironmentContext,
    pub user_feedback: Option<String>,
}

impl LearningExample {
    /// Score this example; `None` when it carries no ground truth
    pub fn outcome(&self) -> Option<Outcome> {
        let truth = self.ground_truth?;
        Some(match (self.detected, truth) {
            (true, GroundTruth::Present(actual)) if actual == self.category => Outcome::TruePositive,
            (true, _) => Outcome::FalsePositive,
            (false, GroundTruth::Present(_)) => Outcome::FalseNegative,
            (false, GroundTruth::Absent) => Outcome::TrueNegative,
        })
    }
}

/// Ground truth implied by a feedback kind
pub fn ground_truth_for(kind: FeedbackKind, category: ObjectCategory, correct_type: Option<ObjectCategory>) -> Option<GroundTruth> {
    match kind {
        FeedbackKind::CorrectDetection | FeedbackKind::MissedDetection => Some(GroundTruth::Present(category)),
        FeedbackKind::FalsePositive => Some(GroundTruth::Absent),
        FeedbackKind::UserCorrection => Some(GroundTruth::Present(correct_type.unwrap_or(category))),
        FeedbackKind::EnvironmentChange | FeedbackKind::Unknown => None,
    }
}

/// Feature vector for an example
pub fn extract_features(
    confidence: f64,
    detection: Option<&Detection>,
    environment: &EnvironmentContext,
    reference_frame_area: f64,
) -> BTreeMap<String, f64> {
    let mut features = BTreeMap::new();
    features.insert("confidence".to_string(), confidence);

    if let Some(detection) = detection {
        features.insert("distance_m".to_string(), detection.distance_m);
        features.insert(
            "bbox_size_ratio".to_string(),
            (detection.bounding_box.area() / reference_frame_area).min(1.0),
        );
        features.insert(
            "motion_magnitude".to_string(),
            detection.motion_vector.map(|m| m.magnitude()).unwrap_or(0.0),
        );
    }

    features.insert("lighting".to_string(), environment.lighting);
    features.insert("weather_score".to_string(), environment.weather.visibility_score());
    features
}
