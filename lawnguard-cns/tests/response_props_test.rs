//! Property tests for the safety state machine

use lawnguard_cns::{PolicyTable, SafetyConfig, SafetyStateMachine};
use lawnguard_core::{BoundingBox, Detection, ObjectCategory, ResponseTier};
use proptest::prelude::*;
use std::time::{Duration, Instant};

fn category() -> impl Strategy<Value = ObjectCategory> {
    prop::sample::select(ObjectCategory::ALL.to_vec())
}

fn detections() -> impl Strategy<Value = Vec<Detection>> {
    prop::collection::vec((0u8..6, category(), 0.0f64..1.0, 0.0f64..20.0), 0..8).prop_map(|raw| {
        raw.into_iter()
            .map(|(id, category, confidence, distance)| {
                Detection::new(
                    format!("obj_{}", id),
                    category,
                    confidence,
                    BoundingBox::new(0.0, 0.0, 40.0, 40.0),
                    distance,
                )
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn graduated_path_never_emergency_stops(cycles in prop::collection::vec(detections(), 1..10)) {
        let mut machine = SafetyStateMachine::new(SafetyConfig::default(), PolicyTable::standard()).unwrap();
        let t0 = Instant::now();
        for (i, cycle) in cycles.iter().enumerate() {
            let now = t0 + Duration::from_millis(100 * i as u64);
            let messages = machine.handle_detections(cycle, now);
            prop_assert!(messages.iter().all(|m| !m.is_emergency_stop()));
            let created = messages.iter().filter(|m| m.topic() == "safety/ml_alert").count();
            prop_assert!(created <= 1);
        }
    }

    #[test]
    fn current_tier_covers_active_responses(cycles in prop::collection::vec(detections(), 1..10)) {
        let mut machine = SafetyStateMachine::new(SafetyConfig::default(), PolicyTable::standard()).unwrap();
        let t0 = Instant::now();
        for (i, cycle) in cycles.iter().enumerate() {
            let now = t0 + Duration::from_secs(i as u64);
            machine.handle_critical(cycle, now);
            machine.handle_detections(cycle, now);
            machine.supervise(now);
            let status = machine.status(now);
            let max = status.active_responses.iter().map(|r| r.tier).max().unwrap_or(ResponseTier::Continue);
            prop_assert!(status.current_tier >= max);
            if status.emergency_stop_latched {
                prop_assert_eq!(status.current_tier, ResponseTier::EmergencyStop);
            }
        }
    }
}
