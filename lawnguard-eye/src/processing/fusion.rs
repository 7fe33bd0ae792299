//! Ensemble fusion of detections from independent detectors

use lawnguard_core::{BoundingBox, Detection, DetectorSource, SafetyLevel};
use tracing::debug;

/// Merges overlapping detections into one record per physical object
pub struct EnsembleFusion {
    iou_threshold: f64,
}

impl EnsembleFusion {
    pub fn new(iou_threshold: f64) -> Self {
        Self { iou_threshold }
    }

    /// Group detections by transitive IoU overlap and collapse each group.
    ///
    /// Groups of size one pass through unchanged. Output order follows the
    /// first member of each group in the input.
    pub fn fuse(&self, detections: Vec<Detection>) -> Vec<Detection> {
        if detections.len() < 2 {
            return detections;
        }

        let mut parent: Vec<usize> = (0..detections.len()).collect();
        for i in 0..detections.len() {
            for j in (i + 1)..detections.len() {
                let iou = detections[i].bounding_box.iou(&detections[j].bounding_box);
                if iou > self.iou_threshold {
                    union(&mut parent, i, j);
                }
            }
        }

        let mut groups: Vec<(usize, Vec<Detection>)> = Vec::new();
        for (index, detection) in detections.into_iter().enumerate() {
            let root = find(&mut parent, index);
            match groups.iter_mut().find(|(r, _)| *r == root) {
                Some((_, members)) => members.push(detection),
                None => groups.push((root, vec![detection])),
            }
        }

        groups
            .into_iter()
            .map(|(_, members)| merge_group(members))
            .collect()
    }
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let root_a = find(parent, a);
    let root_b = find(parent, b);
    if root_a != root_b {
        parent[root_b.max(root_a)] = root_a.min(root_b);
    }
}

/// Collapse one overlap group into a single record
fn merge_group(mut members: Vec<Detection>) -> Detection {
    if members.len() == 1 {
        return members.remove(0);
    }

    let count = members.len() as f64;
    let confidence_sum: f64 = members.iter().map(|d| d.confidence).sum();
    let weight = |d: &Detection| {
        if confidence_sum > 0.0 {
            d.confidence / confidence_sum
        } else {
            1.0 / count
        }
    };

    let mut bbox = BoundingBox::default();
    let mut distance_m = 0.0;
    for member in &members {
        let w = weight(member);
        bbox.x += member.bounding_box.x * w;
        bbox.y += member.bounding_box.y * w;
        bbox.width += member.bounding_box.width * w;
        bbox.height += member.bounding_box.height * w;
        distance_m += member.distance_m * w;
    }

    let safety_level = members
        .iter()
        .map(|d| d.safety_level)
        .max()
        .unwrap_or(SafetyLevel::Low);

    let best_index = members
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.confidence.total_cmp(&b.confidence))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let best = members.swap_remove(best_index);

    debug!(
        "Fused {} detections into '{}' ({})",
        count, best.object_id, best.category
    );

    Detection {
        object_id: best.object_id,
        category: best.category,
        confidence: (confidence_sum / count).min(1.0),
        bounding_box: bbox,
        distance_m,
        safety_level,
        motion_vector: best.motion_vector,
        trajectory: best.trajectory,
        observed_at: best.observed_at,
        source: DetectorSource::Ensemble,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lawnguard_core::{MotionVector, ObjectCategory};

    fn detection(id: &str, confidence: f64, bbox: BoundingBox, level: SafetyLevel) -> Detection {
        Detection::new(id, ObjectCategory::Person, confidence, bbox, 4.0).with_safety_level(level)
    }

    #[test]
    fn test_single_detection_passes_through_unchanged() {
        let fusion = EnsembleFusion::new(0.3);
        let d = detection("a", 0.7, BoundingBox::new(0.0, 0.0, 50.0, 50.0), SafetyLevel::High);
        let fused = fusion.fuse(vec![d.clone()]);
        assert_eq!(fused, vec![d]);
    }

    #[test]
    fn test_non_overlapping_detections_pass_through() {
        let fusion = EnsembleFusion::new(0.3);
        let a = detection("a", 0.7, BoundingBox::new(0.0, 0.0, 50.0, 50.0), SafetyLevel::High);
        let b = detection("b", 0.6, BoundingBox::new(300.0, 300.0, 50.0, 50.0), SafetyLevel::Low);
        let fused = fusion.fuse(vec![a.clone(), b.clone()]);
        assert_eq!(fused, vec![a, b]);
    }

    #[test]
    fn test_overlapping_pair_merges() {
        let fusion = EnsembleFusion::new(0.3);
        let a = detection("a", 0.8, BoundingBox::new(0.0, 0.0, 100.0, 100.0), SafetyLevel::Medium);
        let b = detection("b", 0.6, BoundingBox::new(10.0, 0.0, 100.0, 100.0), SafetyLevel::Critical)
            .with_source(DetectorSource::Backup);
        let fused = fusion.fuse(vec![a, b]);

        assert_eq!(fused.len(), 1);
        let merged = &fused[0];
        assert!((merged.confidence - 0.7).abs() < 1e-9);
        assert_eq!(merged.safety_level, SafetyLevel::Critical);
        assert_eq!(merged.object_id, "a");
        assert_eq!(merged.source, DetectorSource::Ensemble);
        // confidence-weighted x: (0*0.8 + 10*0.6) / 1.4
        assert!((merged.bounding_box.x - 6.0 / 1.4).abs() < 1e-9);
    }

    #[test]
    fn test_transitive_chain_collapses_to_one() {
        let fusion = EnsembleFusion::new(0.3);
        // a overlaps b, b overlaps c, a and c barely touch
        let a = detection("a", 0.5, BoundingBox::new(0.0, 0.0, 100.0, 100.0), SafetyLevel::Low);
        let b = detection("b", 0.9, BoundingBox::new(30.0, 0.0, 100.0, 100.0), SafetyLevel::Low);
        let c = detection("c", 0.7, BoundingBox::new(60.0, 0.0, 100.0, 100.0), SafetyLevel::Medium);
        assert!(a.bounding_box.iou(&c.bounding_box) <= 0.3);

        let fused = fusion.fuse(vec![a, b, c]);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].object_id, "b");
        assert_eq!(fused[0].safety_level, SafetyLevel::Medium);
    }

    #[test]
    fn test_motion_inherited_from_most_confident() {
        let fusion = EnsembleFusion::new(0.3);
        let mut a = detection("a", 0.9, BoundingBox::new(0.0, 0.0, 100.0, 100.0), SafetyLevel::High);
        a.motion_vector = Some(MotionVector { vx: 5.0, vy: 0.0 });
        let mut b = detection("b", 0.4, BoundingBox::new(5.0, 5.0, 100.0, 100.0), SafetyLevel::High);
        b.motion_vector = Some(MotionVector { vx: -50.0, vy: 0.0 });

        let fused = fusion.fuse(vec![b, a]);
        assert_eq!(fused[0].motion_vector, Some(MotionVector { vx: 5.0, vy: 0.0 }));
    }

    #[test]
    fn test_distance_is_confidence_weighted() {
        let fusion = EnsembleFusion::new(0.3);
        let mut a = detection("a", 0.75, BoundingBox::new(0.0, 0.0, 100.0, 100.0), SafetyLevel::High);
        a.distance_m = 2.0;
        let mut b = detection("b", 0.25, BoundingBox::new(0.0, 0.0, 100.0, 100.0), SafetyLevel::High);
        b.distance_m = 6.0;
        let fused = fusion.fuse(vec![a, b]);
        assert!((fused[0].distance_m - 3.0).abs() < 1e-9);
    }
}
