//! Motion estimation and trajectory prediction

use chrono::{DateTime, Utc};
use lawnguard_core::{Detection, MotionVector, Trajectory};
use std::collections::HashMap;
use tracing::debug;

/// Last observed position of an object
#[derive(Debug, Clone, Copy)]
struct LastSeen {
    center: (f64, f64),
    observed_at: DateTime<Utc>,
}

/// Derives velocity from consecutive cycles and projects future positions
pub struct MotionTracker {
    previous: HashMap<String, LastSeen>,
}

impl MotionTracker {
    pub fn new() -> Self {
        Self {
            previous: HashMap::new(),
        }
    }

    /// Annotate this cycle's detections with motion data.
    ///
    /// Only the immediately prior cycle is consulted; objects without a match
    /// there carry no motion data.
    pub fn update(&mut self, detections: Vec<Detection>) -> Vec<Detection> {
        let mut current = HashMap::with_capacity(detections.len());

        let annotated = detections
            .into_iter()
            .map(|mut detection| {
                let center = detection.bounding_box.center();

                detection.motion_vector = None;
                detection.trajectory = None;

                if let Some(prev) = self.previous.get(&detection.object_id) {
                    let dt = (detection.observed_at - prev.observed_at).num_microseconds();
                    if let Some(dt_us) = dt.filter(|us| *us > 0) {
                        let dt_s = dt_us as f64 / 1_000_000.0;
                        let velocity = MotionVector {
                            vx: (center.0 - prev.center.0) / dt_s,
                            vy: (center.1 - prev.center.1) / dt_s,
                        };
                        if velocity.vx.is_finite() && velocity.vy.is_finite() {
                            detection.motion_vector = Some(velocity);
                            detection.trajectory = Some(Trajectory::extrapolate(center, velocity));
                        }
                    }
                }

                current.insert(
                    detection.object_id.clone(),
                    LastSeen {
                        center,
                        observed_at: detection.observed_at,
                    },
                );
                detection
            })
            .collect::<Vec<_>>();

        debug!(
            "Motion update: {} objects, {} with velocity",
            annotated.len(),
            annotated.iter().filter(|d| d.motion_vector.is_some()).count()
        );

        self.previous = current;
        annotated
    }

    pub fn tracked(&self) -> usize {
        self.previous.len()
    }
}

impl Default for MotionTracker {
    fn default() -> Self {
        Self::new()
    }
}
