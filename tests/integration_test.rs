use chrono::Utc;
use lawnguard_cns::MemorySink;
use lawnguard_core::messages::{TOPIC_DETECTION_RESULTS, TOPIC_PERFORMANCE_ALERT};
use lawnguard_core::{BoundingBox, Detection, DetectorSource, ObjectCategory, OutboundMessage};
use lawnguard_eye::{Detector, Frame, RawDetection, ReplayDetector};
use lawnguard_learn::{AdaptiveLearningSystem, FeedbackEvent, JsonFileStore, LearningConfig, LearningStore};
use lawnguard_server::{GuardConfig, GuardRuntime, IntegrationSupervisor, SupervisorConfig};
use std::sync::Arc;
use std::time::Duration;

fn detectors() -> Vec<Arc<dyn Detector>> {
    vec![
        Arc::new(ReplayDetector::new(DetectorSource::Primary)),
        Arc::new(ReplayDetector::new(DetectorSource::Backup)),
    ]
}

fn toy_false_positive(i: usize) -> FeedbackEvent {
    FeedbackEvent::new("false_positive", format!("toy-{}", i), "toy", 0.7)
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[test]
fn test_learned_adjustment_raises_acceptance_bar() {
    let mut system = AdaptiveLearningSystem::new(LearningConfig::default()).unwrap();
    let now = Utc::now();
    for i in 0..3 {
        let outcome = system.ingest(toy_false_positive(i), now);
        if i == 2 {
            assert!(!outcome.triggers.is_empty());
        }
    }
    system.adapt(now);
    let snapshot = system.adjustment_snapshot();
    assert!((snapshot.confidence_adjustment(ObjectCategory::Toy) - 0.05).abs() < 1e-9);

    let supervisor = IntegrationSupervisor::new(SupervisorConfig::default(), now);
    let bbox = BoundingBox::new(300.0, 300.0, 40.0, 40.0);
    let detections = vec![
        Detection::new("toy-9", ObjectCategory::Toy, 0.52, bbox, 0.8),
        Detection::new("dog-9", ObjectCategory::Dog, 0.52, bbox, 6.0),
    ];
    let accepted = supervisor.apply_adjustments(detections, &snapshot);
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].category, ObjectCategory::Dog);
    assert_eq!(accepted[0].confidence, 0.52);
}

#[tokio::test]
async fn test_feedback_adapts_and_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn LearningStore> = Arc::new(JsonFileStore::new(dir.path().join("learning.json")));

    let runtime = GuardRuntime::start(
        GuardConfig::default(),
        detectors(),
        Arc::new(MemorySink::new()),
        Some(store.clone()),
    )
    .unwrap();
    for i in 0..3 {
        runtime.submit_feedback(toy_false_positive(i)).unwrap();
    }
    let learning = runtime.learning().clone();
    wait_for(|| learning.adjustments().confidence_adjustment(ObjectCategory::Toy) > 0.0).await;
    runtime.stop().await;

    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.examples.len(), 3);

    let runtime = GuardRuntime::start(
        GuardConfig::default(),
        detectors(),
        Arc::new(MemorySink::new()),
        Some(store),
    )
    .unwrap();
    assert!(runtime.learning().adjustments().confidence_adjustment(ObjectCategory::Toy) > 0.0);
    assert_eq!(runtime.learning().status().examples, 3);
    runtime.stop().await;
}

#[tokio::test]
async fn test_slow_cycles_raise_performance_alert() {
    let mut config = GuardConfig::default();
    config.supervisor.targets.max_latency_ms = 0.000_001;
    let sink = Arc::new(MemorySink::new());
    let runtime = GuardRuntime::start(config, detectors(), sink.clone(), None).unwrap();

    let frame = Frame::new(1, 640, 480).with_annotations(vec![RawDetection::new(
        "cat",
        0.8,
        BoundingBox::new(10.0, 10.0, 30.0, 30.0),
    )
    .with_distance(7.0)]);
    runtime.submit_frame(frame).unwrap();

    let probe = sink.clone();
    wait_for(move || probe.count(TOPIC_DETECTION_RESULTS) == 1).await;
    let alert = sink
        .messages()
        .into_iter()
        .find(|m| m.topic() == TOPIC_PERFORMANCE_ALERT)
        .unwrap();
    match alert {
        OutboundMessage::PerformanceAlert { violations, .. } => {
            assert!(violations.iter().any(|v| v.contains("latency")));
        }
        other => panic!("unexpected {:?}", other),
    }

    runtime.stop().await;
}
