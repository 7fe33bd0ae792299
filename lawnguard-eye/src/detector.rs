//! Inference seam: frames in, raw detections out.
//!
//! Model loading and accelerator dispatch live outside this crate. A
//! [`Detector`] is anything that can turn a [`Frame`] into [`RawDetection`]s;
//! [`normalize`] converts those into typed [`Detection`] records.

use crate::error::VisionError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use lawnguard_core::{BoundingBox, Detection, DetectorSource, ObjectCategory, SafetyLevel};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::debug;

/// Camera frame handed to the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: u64,
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    /// Encoded image data, opaque to this crate
    #[serde(skip)]
    pub data: Bytes,
    /// Pre-computed detector outputs carried by replayed frames
    #[serde(default)]
    pub annotations: Vec<RawDetection>,
}

impl Frame {
    pub fn new(id: u64, width: u32, height: u32) -> Self {
        Self {
            id,
            captured_at: Utc::now(),
            width,
            height,
            data: Bytes::new(),
            annotations: Vec::new(),
        }
    }

    pub fn with_annotations(mut self, annotations: Vec<RawDetection>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn captured_at(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = at;
        self
    }
}

/// Detector output before normalisation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDetection {
    /// Track id assigned by the detector, if any
    #[serde(default)]
    pub object_id: Option<String>,
    pub label: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub distance_m: Option<f64>,
    #[serde(default)]
    pub source: Option<DetectorSource>,
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
}

impl RawDetection {
    pub fn new(label: impl Into<String>, confidence: f64, bbox: BoundingBox) -> Self {
        Self {
            object_id: None,
            label: label.into(),
            confidence,
            bbox,
            distance_m: None,
            source: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    pub fn with_distance(mut self, distance_m: f64) -> Self {
        self.distance_m = Some(distance_m);
        self
    }

    pub fn with_source(mut self, source: DetectorSource) -> Self {
        self.source = Some(source);
        self
    }
}

/// One independent detector (primary model, backup model, motion cue)
#[async_trait]
pub trait Detector: Send + Sync {
    /// Which ensemble member this detector is
    fn source(&self) -> DetectorSource;

    /// Run inference on a frame
    async fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>, VisionError>;
}

/// Detector that replays the annotations recorded in the frame itself
pub struct ReplayDetector {
    source: DetectorSource,
}

impl ReplayDetector {
    pub fn new(source: DetectorSource) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Detector for ReplayDetector {
    fn source(&self) -> DetectorSource {
        self.source
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>, VisionError> {
        Ok(frame
            .annotations
            .iter()
            .filter(|raw| raw.source.unwrap_or(DetectorSource::Primary) == self.source)
            .cloned()
            .collect())
    }
}

/// Typical real-world height of each category, in metres
fn reference_height_m(category: ObjectCategory) -> f64 {
    match category {
        ObjectCategory::Person => 1.7,
        ObjectCategory::Child => 1.1,
        ObjectCategory::Pet => 0.5,
        ObjectCategory::Dog => 0.6,
        ObjectCategory::Cat => 0.3,
        ObjectCategory::Toy => 0.2,
        ObjectCategory::MovingObject => 1.0,
        ObjectCategory::StaticObject => 0.5,
        ObjectCategory::Unknown => 0.8,
    }
}

/// Pinhole estimate with the focal length approximated by the frame height
pub fn estimate_distance(category: ObjectCategory, bbox: &BoundingBox, frame_height: u32) -> f64 {
    if bbox.height <= 0.0 || frame_height == 0 {
        return MAX_DISTANCE_M;
    }
    let distance = reference_height_m(category) * frame_height as f64 / bbox.height;
    distance.clamp(MIN_DISTANCE_M, MAX_DISTANCE_M)
}

const MIN_DISTANCE_M: f64 = 0.1;
const MAX_DISTANCE_M: f64 = 50.0;

/// Convert raw detector outputs into typed detections.
///
/// Records with non-finite confidence or an invalid box are dropped.
pub fn normalize(frame: &Frame, source: DetectorSource, raw: Vec<RawDetection>) -> Vec<Detection> {
    raw.into_iter()
        .enumerate()
        .filter_map(|(index, raw)| {
            if !raw.confidence.is_finite() || !raw.bbox.is_valid() {
                debug!("Dropping malformed {:?} detection '{}' in frame {}", source, raw.label, frame.id);
                return None;
            }

            let category = ObjectCategory::from_label(&raw.label);
            let distance_m = raw
                .distance_m
                .filter(|d| d.is_finite() && *d >= 0.0)
                .unwrap_or_else(|| estimate_distance(category, &raw.bbox, frame.height));
            let object_id = raw
                .object_id
                .unwrap_or_else(|| format!("{}-{}-{}", source_tag(source), frame.id, index));

            Some(Detection {
                object_id,
                category,
                confidence: raw.confidence.clamp(0.0, 1.0),
                bounding_box: raw.bbox,
                distance_m,
                safety_level: SafetyLevel::assess(category, distance_m),
                motion_vector: None,
                trajectory: None,
                observed_at: frame.captured_at,
                source,
            })
        })
        .collect()
}

fn source_tag(source: DetectorSource) -> &'static str {
    match source {
        DetectorSource::Primary => "primary",
        DetectorSource::Backup => "backup",
        DetectorSource::MotionCue => "motion",
        DetectorSource::Ensemble => "ensemble",
    }
}
