//! Adaptive learning integration tests

use chrono::Utc;
use lawnguard_core::ObjectCategory;
use lawnguard_learn::{
    AdaptiveLearningSystem, EnvironmentContext, FeedbackEvent, JsonFileStore, LearningConfig, LearningStore, Weather,
};
use proptest::prelude::*;

fn feedback(origin: &str, id: usize, category: &str, confidence: f64) -> FeedbackEvent {
    FeedbackEvent::new(origin, format!("{}-{}", category, id), category, confidence)
}

#[test]
fn test_persist_and_reload_is_bitwise_identical() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("learning.json"));

    let mut system = AdaptiveLearningSystem::new(LearningConfig::default()).unwrap();
    let now = Utc::now();
    system.set_environment(EnvironmentContext::default(), now);
    for i in 0..40 {
        let origin = match i % 4 {
            0 => "false_positive",
            1 => "missed_detection",
            2 => "user_feedback",
            _ => "detection_feedback",
        };
        let mut event = feedback(origin, i, "cat", 0.1 + (i as f64) * 0.021).with_comment("near the shed");
        if i % 4 == 2 {
            event = event.with_correct_type("dog");
        }
        if i == 20 {
            event = event.with_environment(EnvironmentContext {
                lighting: 0.35,
                weather: Weather::Fog,
                ..EnvironmentContext::default()
            });
        }
        system.ingest(event, now);
    }
    system.adapt(now);
    system.environment_tick(now);

    let before = system.snapshot();
    store.save(&before).unwrap();
    let loaded = store.load().unwrap().unwrap();
    assert_eq!(loaded, before);

    let restored = AdaptiveLearningSystem::restore(LearningConfig::default(), loaded).unwrap();
    let after = restored.snapshot();
    assert_eq!(after, before);
    assert_eq!(
        serde_json::to_string(&after).unwrap(),
        serde_json::to_string(&before).unwrap()
    );
    for (a, b) in after.examples.iter().zip(before.examples.iter()) {
        assert_eq!(a.confidence.to_bits(), b.confidence.to_bits());
    }
}

#[test]
fn test_legacy_unknown_origin_counts_as_correct() {
    let config = LearningConfig {
        unknown_origin: lawnguard_learn::UnknownOriginPolicy::CorrectDetection,
        ..LearningConfig::default()
    };
    let mut system = AdaptiveLearningSystem::new(config).unwrap();
    let now = Utc::now();
    system.ingest(feedback("misrouted", 1, "dog", 0.9), now);
    system.adapt(now);
    assert_eq!(system.global_metrics().unwrap().accuracy, 1.0);
}

proptest! {
    #[test]
    fn toy_adjustment_stays_bounded(reports in prop::collection::vec(0u8..4, 1..120)) {
        let mut system = AdaptiveLearningSystem::new(LearningConfig::default()).unwrap();
        let now = Utc::now();
        for (i, report) in reports.into_iter().enumerate() {
            let origin = match report {
                0 | 1 => "false_positive",
                2 => "detection_feedback",
                _ => "missed_detection",
            };
            let outcome = system.ingest(feedback(origin, i, "toy", 0.75), now);
            if !outcome.triggers.is_empty() {
                system.adapt(now);
            }
            let adjustment = system.confidence_adjustment(ObjectCategory::Toy, None);
            prop_assert!((-0.30..=0.30).contains(&adjustment));
        }
    }

    #[test]
    fn repeated_false_positives_saturate_at_cap(count in 10usize..60) {
        let mut system = AdaptiveLearningSystem::new(LearningConfig::default()).unwrap();
        let now = Utc::now();
        for i in 0..count {
            if !system.ingest(feedback("false_positive", i, "toy", 0.75), now).triggers.is_empty() {
                system.adapt(now);
            }
        }
        let adjustment = system.confidence_adjustment(ObjectCategory::Toy, None);
        prop_assert!(adjustment <= 0.30);
        prop_assert!(adjustment > 0.0);
    }
}
