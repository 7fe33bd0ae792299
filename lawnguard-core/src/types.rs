//! Detection data model shared by every lawnguard subsystem

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Object category produced by the detectors.
///
/// Closed set with an explicit [`ObjectCategory::Unknown`] fallback; labels
/// coming from the inference engine are resolved with [`ObjectCategory::from_label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectCategory {
    Person,
    Child,
    Pet,
    Dog,
    Cat,
    Toy,
    MovingObject,
    StaticObject,
    Unknown,
}

impl ObjectCategory {
    pub const ALL: [ObjectCategory; 9] = [
        ObjectCategory::Person,
        ObjectCategory::Child,
        ObjectCategory::Pet,
        ObjectCategory::Dog,
        ObjectCategory::Cat,
        ObjectCategory::Toy,
        ObjectCategory::MovingObject,
        ObjectCategory::StaticObject,
        ObjectCategory::Unknown,
    ];

    /// Resolve a free-form detector label, falling back to `Unknown`
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "person" | "human" | "adult" | "pedestrian" => ObjectCategory::Person,
            "child" | "kid" | "toddler" => ObjectCategory::Child,
            "pet" | "animal" => ObjectCategory::Pet,
            "dog" | "puppy" => ObjectCategory::Dog,
            "cat" | "kitten" => ObjectCategory::Cat,
            "toy" | "ball" | "sports_ball" | "teddy_bear" => ObjectCategory::Toy,
            "moving_object" | "moving" => ObjectCategory::MovingObject,
            "static_object" | "static" | "obstacle" => ObjectCategory::StaticObject,
            _ => ObjectCategory::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectCategory::Person => "person",
            ObjectCategory::Child => "child",
            ObjectCategory::Pet => "pet",
            ObjectCategory::Dog => "dog",
            ObjectCategory::Cat => "cat",
            ObjectCategory::Toy => "toy",
            ObjectCategory::MovingObject => "moving_object",
            ObjectCategory::StaticObject => "static_object",
            ObjectCategory::Unknown => "unknown",
        }
    }

    pub fn is_human(&self) -> bool {
        matches!(self, ObjectCategory::Person | ObjectCategory::Child)
    }

    pub fn is_animal(&self) -> bool {
        matches!(self, ObjectCategory::Pet | ObjectCategory::Dog | ObjectCategory::Cat)
    }
}

impl FromStr for ObjectCategory {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ObjectCategory::from_label(s))
    }
}

impl fmt::Display for ObjectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Safety level of a detection, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SafetyLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl SafetyLevel {
    pub const ALL: [SafetyLevel; 4] = [
        SafetyLevel::Low,
        SafetyLevel::Medium,
        SafetyLevel::High,
        SafetyLevel::Critical,
    ];

    /// Assess the level of a freshly normalised detection from its category
    /// and estimated distance.
    pub fn assess(category: ObjectCategory, distance_m: f64) -> Self {
        let [critical, high, medium] = Self::distance_bands(category);
        if distance_m < critical {
            SafetyLevel::Critical
        } else if distance_m < high {
            SafetyLevel::High
        } else if distance_m < medium {
            SafetyLevel::Medium
        } else {
            SafetyLevel::Low
        }
    }

    /// Upper distance bounds in metres of the CRITICAL, HIGH and MEDIUM bands
    pub fn distance_bands(category: ObjectCategory) -> [f64; 3] {
        match category {
            ObjectCategory::Child => [4.0, 8.0, 12.0],
            ObjectCategory::Person => [3.0, 6.0, 10.0],
            ObjectCategory::Pet | ObjectCategory::Dog | ObjectCategory::Cat => [1.5, 4.0, 8.0],
            ObjectCategory::MovingObject => [0.0, 1.5, 5.0],
            ObjectCategory::Unknown => [0.0, 1.5, 4.0],
            ObjectCategory::StaticObject => [0.0, 0.3, 1.0],
            ObjectCategory::Toy => [0.0, 0.0, 1.0],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyLevel::Low => "LOW",
            SafetyLevel::Medium => "MEDIUM",
            SafetyLevel::High => "HIGH",
            SafetyLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Graduated response tier, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseTier {
    Continue,
    SlowDown,
    StopAndAssess,
    Retreat,
    EmergencyStop,
}

impl ResponseTier {
    /// Next tier when an active response times out without clearance.
    ///
    /// `None` means the response is already at the top tier.
    pub fn escalate(&self) -> Option<ResponseTier> {
        match self {
            ResponseTier::Continue => Some(ResponseTier::SlowDown),
            ResponseTier::SlowDown => Some(ResponseTier::StopAndAssess),
            ResponseTier::StopAndAssess | ResponseTier::Retreat => Some(ResponseTier::EmergencyStop),
            ResponseTier::EmergencyStop => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseTier::Continue => "CONTINUE",
            ResponseTier::SlowDown => "SLOW_DOWN",
            ResponseTier::StopAndAssess => "STOP_AND_ASSESS",
            ResponseTier::Retreat => "RETREAT",
            ResponseTier::EmergencyStop => "EMERGENCY_STOP",
        }
    }
}

impl Default for ResponseTier {
    fn default() -> Self {
        ResponseTier::Continue
    }
}

impl fmt::Display for ResponseTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which independent detector produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorSource {
    Primary,
    Backup,
    MotionCue,
    /// Result of merging several sources
    Ensemble,
}

impl Default for DetectorSource {
    fn default() -> Self {
        DetectorSource::Primary
    }
}

/// Axis-aligned rectangle in pixel coordinates, `(x, y)` is the top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width >= 0.0
            && self.height >= 0.0
    }

    /// Intersection-over-Union with another box; 0.0 for invalid input
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        if !self.is_valid() || !other.is_valid() {
            return 0.0;
        }

        let inter_x_min = self.x.max(other.x);
        let inter_y_min = self.y.max(other.y);
        let inter_x_max = (self.x + self.width).min(other.x + other.width);
        let inter_y_max = (self.y + self.height).min(other.y + other.height);

        if inter_x_max <= inter_x_min || inter_y_max <= inter_y_min {
            return 0.0;
        }

        let inter_area = (inter_x_max - inter_x_min) * (inter_y_max - inter_y_min);
        let union_area = self.area() + other.area() - inter_area;

        if union_area <= 0.0 || !union_area.is_finite() {
            return 0.0;
        }

        let iou = inter_area / union_area;
        if iou.is_finite() && (0.0..=1.0).contains(&iou) {
            iou
        } else {
            0.0
        }
    }
}

/// Image-plane velocity in pixels per second
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionVector {
    pub vx: f64,
    pub vy: f64,
}

impl MotionVector {
    pub fn magnitude(&self) -> f64 {
        (self.vx * self.vx + self.vy * self.vy).sqrt()
    }
}

/// Projected position `t_offset_s` seconds after the observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub x: f64,
    pub y: f64,
    pub t_offset_s: f64,
}

/// Four projected positions at fixed horizons, ordered by time offset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    points: [TrajectoryPoint; 4],
}

impl Trajectory {
    pub const HORIZONS_S: [f64; 4] = [0.5, 1.0, 1.5, 2.0];

    /// Linear extrapolation from `origin` along `velocity`
    pub fn extrapolate(origin: (f64, f64), velocity: MotionVector) -> Self {
        let points = Self::HORIZONS_S.map(|t| TrajectoryPoint {
            x: origin.0 + velocity.vx * t,
            y: origin.1 + velocity.vy * t,
            t_offset_s: t,
        });
        Self { points }
    }

    pub fn points(&self) -> &[TrajectoryPoint] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrajectoryPoint> {
        self.points.iter()
    }

    /// Final projected point
    pub fn last(&self) -> &TrajectoryPoint {
        &self.points[3]
    }
}

/// A single detection record.
///
/// Produced by the pipeline each cycle and superseded, never mutated, by
/// later cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub object_id: String,
    pub category: ObjectCategory,
    pub confidence: f64,
    pub bounding_box: BoundingBox,
    pub distance_m: f64,
    pub safety_level: SafetyLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion_vector: Option<MotionVector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory: Option<Trajectory>,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub source: DetectorSource,
}

impl Detection {
    /// Build a detection with the safety level assessed from category and distance
    pub fn new(
        object_id: impl Into<String>,
        category: ObjectCategory,
        confidence: f64,
        bounding_box: BoundingBox,
        distance_m: f64,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            category,
            confidence: confidence.clamp(0.0, 1.0),
            bounding_box,
            distance_m,
            safety_level: SafetyLevel::assess(category, distance_m),
            motion_vector: None,
            trajectory: None,
            observed_at: Utc::now(),
            source: DetectorSource::Primary,
        }
    }

    pub fn with_safety_level(mut self, level: SafetyLevel) -> Self {
        self.safety_level = level;
        self
    }

    pub fn with_source(mut self, source: DetectorSource) -> Self {
        self.source = source;
        self
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }

    pub fn is_critical(&self) -> bool {
        self.safety_level == SafetyLevel::Critical
    }
}
