use lawnguard_core::{BoundingBox, Detection, ObjectCategory, ResponseTier, SafetyLevel};
use lawnguard_learn::{AdjustmentEntry, AdjustmentKey, AdjustmentSnapshot, AdjustmentTable, LearningConfig};
use lawnguard_server::{AdjustmentMode, IntegrationSupervisor, SupervisorConfig};
use proptest::prelude::*;

fn arb_category() -> impl Strategy<Value = ObjectCategory> {
    prop::sample::select(ObjectCategory::ALL.to_vec())
}

fn snapshot_with(category: ObjectCategory, value: f64) -> AdjustmentSnapshot {
    let table = AdjustmentTable::from_entries(&[AdjustmentEntry {
        key: AdjustmentKey::global(category),
        value,
    }]);
    AdjustmentSnapshot::from_table(table, None, &LearningConfig::default())
}

proptest! {
    #[test]
    fn test_closer_is_never_safer(category in arb_category(), a in 0.0f64..20.0, b in 0.0f64..20.0) {
        let (near, far) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(SafetyLevel::assess(category, near) >= SafetyLevel::assess(category, far));
    }

    #[test]
    fn test_escalation_strictly_rises(steps in 0usize..8) {
        let mut tier = ResponseTier::SlowDown;
        for _ in 0..steps {
            match tier.escalate() {
                Some(next) => {
                    prop_assert!(next > tier);
                    tier = next;
                }
                None => {
                    prop_assert_eq!(tier, ResponseTier::EmergencyStop);
                    break;
                }
            }
        }
    }

    #[test]
    fn test_threshold_only_never_alters_confidence(
        category in arb_category(),
        confidence in 0.0f64..1.0,
        adjustment in -0.3f64..0.3,
    ) {
        let supervisor = IntegrationSupervisor::new(SupervisorConfig::default(), chrono::Utc::now());
        let snapshot = snapshot_with(category, adjustment);
        let detection = Detection::new("obj", category, confidence, BoundingBox::new(0.0, 0.0, 10.0, 10.0), 5.0);

        let accepted = supervisor.apply_adjustments(vec![detection], &snapshot);
        let threshold = 0.5 + snapshot.confidence_adjustment(category);
        prop_assert_eq!(accepted.len(), usize::from(confidence >= threshold));
        for d in &accepted {
            prop_assert_eq!(d.confidence, confidence);
        }
    }

    #[test]
    fn test_legacy_mode_accepts_subset(
        category in arb_category(),
        confidence in 0.0f64..1.0,
        adjustment in 0.0f64..0.3,
    ) {
        let legacy = IntegrationSupervisor::new(
            SupervisorConfig { adjustment_mode: AdjustmentMode::LegacyDouble, ..SupervisorConfig::default() },
            chrono::Utc::now(),
        );
        let modern = IntegrationSupervisor::new(SupervisorConfig::default(), chrono::Utc::now());
        let snapshot = snapshot_with(category, adjustment);
        let detection = Detection::new("obj", category, confidence, BoundingBox::new(0.0, 0.0, 10.0, 10.0), 5.0);

        let legacy_count = legacy.apply_adjustments(vec![detection.clone()], &snapshot).len();
        let modern_count = modern.apply_adjustments(vec![detection], &snapshot).len();
        prop_assert!(legacy_count <= modern_count);
    }
}
