//! Adaptive learning system.
//!
//! Owns the example history, the recent-detection cache, derived metrics and
//! the confidence adjustment table. All methods take `&mut self`; the
//! [`crate::service::LearningService`] task is the single owner at runtime.

use crate::adjustment::{AdjustmentKey, AdjustmentTable};
use crate::config::LearningConfig;
use crate::environment::{EnvironmentContext, EnvironmentKey, EnvironmentRecord};
use crate::error::LearningError;
use crate::feedback::{extract_features, ground_truth_for, FeedbackEvent, FeedbackKind, LearningExample, Outcome};
use crate::metrics::ModelPerformanceMetrics;
use crate::store::LearningSnapshot;
use chrono::{DateTime, Utc};
use lawnguard_core::{Detection, ObjectCategory};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::num::NonZeroUsize;
use tracing::{debug, info};
use uuid::Uuid;

/// Reason an immediate adaptation pass was requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum AdaptationTrigger {
    RepeatedErrors { category: ObjectCategory, count: usize },
    UserCorrection { confidence: f64 },
    EnvironmentChange,
    PerformanceDrop,
}

/// Result of ingesting one feedback event
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub example_id: String,
    pub kind: FeedbackKind,
    pub triggers: Vec<AdaptationTrigger>,
}

/// Result of an environment tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentTick {
    pub significant_changes: Vec<&'static str>,
    pub environment_fpr: Option<f64>,
    pub adapted: bool,
}

/// Read-only view of the adjustments, published to consumers after every change
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentSnapshot {
    table: AdjustmentTable,
    environment: Option<EnvironmentKey>,
    weight: f64,
    limit: f64,
}

impl AdjustmentSnapshot {
    pub fn empty(config: &LearningConfig) -> Self {
        Self {
            table: AdjustmentTable::new(),
            environment: None,
            weight: config.environment_weight,
            limit: config.max_query_adjustment,
        }
    }

    /// Snapshot over an existing table, e.g. one restored from storage
    pub fn from_table(table: AdjustmentTable, environment: Option<EnvironmentKey>, config: &LearningConfig) -> Self {
        Self {
            table,
            environment,
            weight: config.environment_weight,
            limit: config.max_query_adjustment,
        }
    }

    /// Adjustment for `category` in the current environment
    pub fn confidence_adjustment(&self, category: ObjectCategory) -> f64 {
        self.table.query(category, self.environment, self.weight, self.limit)
    }

    pub fn environment(&self) -> Option<EnvironmentKey> {
        self.environment
    }

    pub fn table(&self) -> &AdjustmentTable {
        &self.table
    }
}

pub struct AdaptiveLearningSystem {
    config: LearningConfig,
    examples: VecDeque<LearningExample>,
    recent_detections: LruCache<String, Detection>,
    adjustments: AdjustmentTable,
    metrics: BTreeMap<ObjectCategory, ModelPerformanceMetrics>,
    global_metrics: Option<ModelPerformanceMetrics>,
    environment: Option<EnvironmentContext>,
    environment_history: VecDeque<EnvironmentRecord>,
    last_environment_check: Option<EnvironmentContext>,
    last_environment_adaptation: Option<DateTime<Utc>>,
    last_adaptation: Option<DateTime<Utc>>,
    appended_since_flush: usize,
}

impl AdaptiveLearningSystem {
    pub fn new(config: LearningConfig) -> Result<Self, LearningError> {
        config.validate().map_err(LearningError::Config)?;
        let cache_size = NonZeroUsize::new(config.detection_cache_size)
            .ok_or_else(|| LearningError::Config("detection_cache_size must be > 0".to_string()))?;

        Ok(Self {
            examples: VecDeque::with_capacity(config.max_examples.min(1024)),
            recent_detections: LruCache::new(cache_size),
            adjustments: AdjustmentTable::new(),
            metrics: BTreeMap::new(),
            global_metrics: None,
            environment: None,
            environment_history: VecDeque::new(),
            last_environment_check: None,
            last_environment_adaptation: None,
            last_adaptation: None,
            appended_since_flush: 0,
            config,
        })
    }

    /// Rebuild from persisted state
    pub fn restore(config: LearningConfig, snapshot: LearningSnapshot) -> Result<Self, LearningError> {
        let mut system = Self::new(config)?;
        let skip = snapshot.examples.len().saturating_sub(system.config.max_examples);
        system.examples = snapshot.examples.into_iter().skip(skip).collect();
        system.environment_history = snapshot.environment_history.into_iter().collect();
        system.environment = system.environment_history.back().map(|r| r.context.clone());
        system.last_environment_check = system.environment.clone();
        system.metrics = snapshot.metrics;
        system.global_metrics = snapshot.global_metrics;
        system.adjustments = AdjustmentTable::from_entries(&snapshot.adjustments);
        Ok(system)
    }

    pub fn snapshot(&self) -> LearningSnapshot {
        LearningSnapshot {
            examples: self.examples.iter().cloned().collect(),
            environment_history: self.environment_history.iter().cloned().collect(),
            metrics: self.metrics.clone(),
            global_metrics: self.global_metrics.clone(),
            adjustments: self.adjustments.entries(),
        }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Remember published detections so later feedback can be enriched
    pub fn record_detections(&mut self, detections: &[Detection]) {
        for detection in detections {
            self.recent_detections.put(detection.object_id.clone(), detection.clone());
        }
    }

    pub fn cached_detection(&mut self, id: &str) -> Option<&Detection> {
        self.recent_detections.get(id)
    }

    /// Record the current operating environment
    pub fn set_environment(&mut self, context: EnvironmentContext, now: DateTime<Utc>) {
        if self.environment.as_ref() == Some(&context) {
            return;
        }
        if self.environment_history.len() == self.config.environment_history {
            self.environment_history.pop_front();
        }
        self.environment_history.push_back(EnvironmentRecord {
            recorded_at: now,
            context: context.clone(),
        });
        if self.last_environment_check.is_none() {
            self.last_environment_check = Some(context.clone());
        }
        self.environment = Some(context);
    }

    pub fn environment(&self) -> Option<&EnvironmentContext> {
        self.environment.as_ref()
    }

    /// Turn a feedback event into a learning example and evaluate the immediate triggers
    pub fn ingest(&mut self, event: FeedbackEvent, now: DateTime<Utc>) -> IngestOutcome {
        let kind = FeedbackKind::from_origin(&event.origin, self.config.unknown_origin);

        if let Some(context) = event.environment.clone() {
            self.set_environment(context, now);
        }
        let environment = self.environment.clone().unwrap_or_default();

        let cached = self.recent_detections.get(&event.detection_id).cloned();
        let category = match &cached {
            Some(detection) if event.object_type.is_empty() => detection.category,
            _ => ObjectCategory::from_label(&event.object_type),
        };
        let correct_type = event.correct_type.as_deref().map(ObjectCategory::from_label);

        let example = LearningExample {
            example_id: Uuid::new_v4().to_string(),
            timestamp: now,
            detection_id: event.detection_id,
            category,
            confidence: event.confidence.clamp(0.0, 1.0),
            bounding_box: cached.as_ref().map(|d| d.bounding_box).unwrap_or_default(),
            features: extract_features(
                event.confidence,
                cached.as_ref(),
                &environment,
                self.config.reference_frame_area,
            ),
            detected: kind != FeedbackKind::MissedDetection,
            ground_truth: ground_truth_for(kind, category, correct_type),
            feedback_kind: kind,
            environment_context: environment,
            user_feedback: event.user_comment,
        };
        let example_id = example.example_id.clone();
        let confidence = example.confidence;

        self.push_example(example);

        let mut triggers = Vec::new();
        if kind.is_error_report() {
            let count = self
                .examples
                .iter()
                .rev()
                .take(self.config.trigger_window)
                .filter(|e| e.category == category && e.feedback_kind.is_error_report())
                .count();
            if count >= self.config.trigger_count {
                triggers.push(AdaptationTrigger::RepeatedErrors { category, count });
            }
        }
        if kind == FeedbackKind::UserCorrection && confidence > self.config.user_correction_confidence {
            triggers.push(AdaptationTrigger::UserCorrection { confidence });
        }
        if kind == FeedbackKind::EnvironmentChange {
            triggers.push(AdaptationTrigger::EnvironmentChange);
        }

        debug!("Ingested {:?} feedback for {} ({} triggers)", kind, category, triggers.len());
        IngestOutcome {
            example_id,
            kind,
            triggers,
        }
    }

    fn push_example(&mut self, example: LearningExample) {
        if self.examples.len() == self.config.max_examples {
            self.examples.pop_front();
        }
        self.examples.push_back(example);
        self.appended_since_flush += 1;
    }

    fn window(&self) -> impl Iterator<Item = &LearningExample> {
        let skip = self.examples.len().saturating_sub(self.config.metrics_window);
        self.examples.iter().skip(skip)
    }

    /// Recompute metrics and nudge per-category adjustments.
    ///
    /// Returns the adjustments that changed.
    pub fn adapt(&mut self, now: DateTime<Utc>) -> Vec<(AdjustmentKey, f64)> {
        self.global_metrics = ModelPerformanceMetrics::compute(self.window(), now);

        let mut metrics = BTreeMap::new();
        for category in ObjectCategory::ALL {
            let computed = ModelPerformanceMetrics::compute(self.window().filter(|e| e.category == category), now);
            if let Some(m) = computed {
                metrics.insert(category, m);
            }
        }

        let mut changed = Vec::new();
        for (category, m) in &metrics {
            let delta = if m.false_positive_rate > self.config.high_fpr {
                self.config.global_step_up
            } else if m.false_positive_rate < self.config.low_fpr {
                -self.config.global_step_down
            } else {
                continue;
            };
            let key = AdjustmentKey::global(*category);
            let before = self.adjustments.get(&key);
            let after = self.adjustments.nudge(key, delta, self.config.max_adjustment);
            if after != before {
                changed.push((key, after));
            }
        }

        self.metrics = metrics;
        self.last_adaptation = Some(now);
        if !changed.is_empty() {
            info!("Adaptation pass adjusted {} categories", changed.len());
        }
        changed
    }

    /// Periodic recompute; runs only once enough examples exist
    pub fn periodic_update(&mut self, now: DateTime<Utc>) -> Option<Vec<(AdjustmentKey, f64)>> {
        if self.examples.len() < self.config.min_examples_for_update {
            return None;
        }
        Some(self.adapt(now))
    }

    /// Decay all adjustments, then check whether the environment warrants a scoped pass
    pub fn environment_tick(&mut self, now: DateTime<Utc>) -> EnvironmentTick {
        self.adjustments.decay(self.config.decay_factor, self.config.snap_threshold);

        let Some(current) = self.environment.clone() else {
            return EnvironmentTick::default();
        };

        let significant_changes = match &self.last_environment_check {
            Some(previous) => current.significant_changes(previous, self.config.significant_change_ratio),
            None => Vec::new(),
        };
        self.last_environment_check = Some(current.clone());

        let key = current.key();
        let environment_fpr = self.environment_false_positive_rate(key);
        let cooled_down = self
            .last_environment_adaptation
            .map(|at| (now - at).num_seconds() >= self.config.environment_cooldown_secs)
            .unwrap_or(true);

        let by_changes = significant_changes.len() >= self.config.significant_changes_required;
        let by_rate = cooled_down && environment_fpr.is_some_and(|fpr| fpr > self.config.environment_fpr_trigger);

        let adapted = if by_changes || by_rate {
            self.adapt_environment(key, now);
            true
        } else {
            false
        };

        EnvironmentTick {
            significant_changes,
            environment_fpr,
            adapted,
        }
    }

    /// False-positive rate among recent examples from `key`, if there are enough of them
    fn environment_false_positive_rate(&self, key: EnvironmentKey) -> Option<f64> {
        let outcomes: Vec<Outcome> = self
            .window()
            .filter(|e| e.environment_context.key() == key)
            .filter_map(|e| e.outcome())
            .collect();
        if outcomes.len() < self.config.environment_min_examples {
            return None;
        }
        let fp = outcomes.iter().filter(|o| **o == Outcome::FalsePositive).count();
        Some(fp as f64 / outcomes.len() as f64)
    }

    fn adapt_environment(&mut self, key: EnvironmentKey, now: DateTime<Utc>) {
        let mut per_category: BTreeMap<ObjectCategory, (usize, usize)> = BTreeMap::new();
        for example in self.window().filter(|e| e.environment_context.key() == key) {
            if let Some(outcome) = example.outcome() {
                let entry = per_category.entry(example.category).or_default();
                entry.1 += 1;
                if outcome == Outcome::FalsePositive {
                    entry.0 += 1;
                }
            }
        }

        for (category, (fp, total)) in per_category {
            let fpr = fp as f64 / total as f64;
            let delta = if fpr > self.config.high_fpr {
                self.config.environment_step_up
            } else if fpr < self.config.low_fpr {
                -self.config.environment_step_down
            } else {
                continue;
            };
            let value = self
                .adjustments
                .nudge(AdjustmentKey::scoped(category, key), delta, self.config.max_adjustment);
            debug!("Environment {} adjustment for {}: {:.3}", key, category, value);
        }

        info!("Environment adaptation pass for {}", key);
        self.last_environment_adaptation = Some(now);
    }

    /// `clip(base + weight * environment_adjustment, -limit, limit)`
    pub fn confidence_adjustment(&self, category: ObjectCategory, environment: Option<EnvironmentKey>) -> f64 {
        self.adjustments.query(
            category,
            environment,
            self.config.environment_weight,
            self.config.max_query_adjustment,
        )
    }

    pub fn adjustment_snapshot(&self) -> AdjustmentSnapshot {
        AdjustmentSnapshot::from_table(
            self.adjustments.clone(),
            self.environment.as_ref().map(|e| e.key()),
            &self.config,
        )
    }

    pub fn adjustments(&self) -> &AdjustmentTable {
        &self.adjustments
    }

    pub fn needs_flush(&self) -> bool {
        self.appended_since_flush >= self.config.flush_every
    }

    pub fn mark_flushed(&mut self) {
        self.appended_since_flush = 0;
    }

    pub fn examples(&self) -> impl Iterator<Item = &LearningExample> {
        self.examples.iter()
    }

    pub fn example_count(&self) -> usize {
        self.examples.len()
    }

    pub fn metrics(&self, category: ObjectCategory) -> Option<&ModelPerformanceMetrics> {
        self.metrics.get(&category)
    }

    pub fn global_metrics(&self) -> Option<&ModelPerformanceMetrics> {
        self.global_metrics.as_ref()
    }

    pub fn last_adaptation(&self) -> Option<DateTime<Utc>> {
        self.last_adaptation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Weather;
    use chrono::Duration;
    use lawnguard_core::BoundingBox;

    fn system() -> AdaptiveLearningSystem {
        AdaptiveLearningSystem::new(LearningConfig::default()).unwrap()
    }

    fn fp(id: &str, category: &str) -> FeedbackEvent {
        FeedbackEvent::new("false_positive", id, category, 0.7)
    }

    #[test]
    fn test_repeated_errors_trigger() {
        let mut system = system();
        let now = Utc::now();
        assert!(system.ingest(fp("a", "toy"), now).triggers.is_empty());
        assert!(system.ingest(fp("b", "toy"), now).triggers.is_empty());
        assert!(system.ingest(fp("c", "dog"), now).triggers.is_empty());
        let outcome = system.ingest(fp("d", "toy"), now);
        assert_eq!(
            outcome.triggers,
            vec![AdaptationTrigger::RepeatedErrors {
                category: ObjectCategory::Toy,
                count: 3
            }]
        );
    }

    #[test]
    fn test_user_correction_and_environment_triggers() {
        let mut system = system();
        let now = Utc::now();
        let low = FeedbackEvent::new("user_feedback", "a", "dog", 0.6).with_correct_type("cat");
        assert!(system.ingest(low, now).triggers.is_empty());

        let high = FeedbackEvent::new("user_feedback", "b", "dog", 0.9).with_correct_type("cat");
        assert_eq!(
            system.ingest(high, now).triggers,
            vec![AdaptationTrigger::UserCorrection { confidence: 0.9 }]
        );

        let env = FeedbackEvent::new("environment_change", "", "", 0.0);
        assert_eq!(system.ingest(env, now).triggers, vec![AdaptationTrigger::EnvironmentChange]);
    }

    #[test]
    fn test_history_is_capped() {
        let config = LearningConfig {
            max_examples: 5,
            ..LearningConfig::default()
        };
        let mut system = AdaptiveLearningSystem::new(config).unwrap();
        for i in 0..8 {
            system.ingest(FeedbackEvent::new("detection_feedback", format!("d{}", i), "dog", 0.9), Utc::now());
        }
        assert_eq!(system.example_count(), 5);
        assert_eq!(system.examples().next().unwrap().detection_id, "d3");
    }

    #[test]
    fn test_feedback_enriched_from_cache() {
        let mut system = system();
        let detection = Detection::new("dog-7", ObjectCategory::Dog, 0.8, BoundingBox::new(0.0, 0.0, 64.0, 48.0), 3.5);
        system.record_detections(&[detection]);
        system.ingest(FeedbackEvent::new("detection_feedback", "dog-7", "dog", 0.8), Utc::now());

        let example = system.examples().last().unwrap();
        assert_eq!(example.features["distance_m"], 3.5);
        assert_eq!(example.bounding_box.width, 64.0);
    }

    #[test]
    fn test_adapt_raises_on_false_positives_and_lowers_on_clean() {
        let mut system = system();
        let now = Utc::now();
        for i in 0..10 {
            system.ingest(fp(&format!("t{}", i), "toy"), now);
            system.ingest(FeedbackEvent::new("detection_feedback", format!("p{}", i), "person", 0.9), now);
        }
        system.adapt(now);
        assert!((system.confidence_adjustment(ObjectCategory::Toy, None) - 0.05).abs() < 1e-9);
        assert!((system.confidence_adjustment(ObjectCategory::Person, None) + 0.025).abs() < 1e-9);
        assert_eq!(system.metrics(ObjectCategory::Person).unwrap().accuracy, 1.0);
    }

    #[test]
    fn test_unknown_feedback_excluded_from_metrics() {
        let mut system = system();
        let now = Utc::now();
        system.ingest(FeedbackEvent::new("carrier_pigeon", "x", "dog", 0.9), now);
        system.adapt(now);
        assert!(system.global_metrics().is_none());
        assert_eq!(system.examples().next().unwrap().feedback_kind, FeedbackKind::Unknown);
    }

    #[test]
    fn test_periodic_update_needs_min_examples() {
        let mut system = system();
        let now = Utc::now();
        for i in 0..99 {
            system.ingest(fp(&format!("t{}", i), "toy"), now);
        }
        assert!(system.periodic_update(now).is_none());
        system.ingest(fp("t99", "toy"), now);
        assert!(system.periodic_update(now).is_some());
    }

    #[test]
    fn test_environment_pass_on_two_significant_changes() {
        let mut system = system();
        let t0 = Utc::now();
        system.set_environment(EnvironmentContext::default(), t0);
        for i in 0..4 {
            let rainy = EnvironmentContext {
                lighting: 0.4,
                weather: Weather::Rain,
                ..EnvironmentContext::default()
            };
            system.ingest(fp(&format!("t{}", i), "toy").with_environment(rainy), t0);
        }

        let tick = system.environment_tick(t0 + Duration::seconds(30));
        assert_eq!(tick.significant_changes, vec!["lighting", "weather"]);
        assert!(tick.adapted);

        let key = system.environment().unwrap().key();
        let scoped = system.adjustments().get(&AdjustmentKey::scoped(ObjectCategory::Toy, key));
        assert!((scoped - 0.10).abs() < 1e-9);
        assert!((system.confidence_adjustment(ObjectCategory::Toy, Some(key)) - 0.03).abs() < 1e-9);

        // unchanged environment, too few examples for the rate trigger
        let tick = system.environment_tick(t0 + Duration::seconds(60));
        assert!(!tick.adapted);
    }

    #[test]
    fn test_environment_rate_trigger_respects_cooldown() {
        let mut system = system();
        let t0 = Utc::now();
        system.set_environment(EnvironmentContext::default(), t0);
        for i in 0..12 {
            system.ingest(fp(&format!("t{}", i), "cat"), t0);
        }

        let first = system.environment_tick(t0);
        assert_eq!(first.environment_fpr, Some(1.0));
        assert!(first.adapted);

        assert!(!system.environment_tick(t0 + Duration::seconds(60)).adapted);
        assert!(system.environment_tick(t0 + Duration::seconds(301)).adapted);
    }

    #[test]
    fn test_environment_tick_decays() {
        let mut system = system();
        let now = Utc::now();
        for i in 0..3 {
            system.ingest(fp(&format!("t{}", i), "toy"), now);
        }
        system.adapt(now);
        system.environment_tick(now);
        assert!((system.confidence_adjustment(ObjectCategory::Toy, None) - 0.0475).abs() < 1e-9);
    }

    #[test]
    fn test_flush_accounting() {
        let config = LearningConfig {
            flush_every: 2,
            ..LearningConfig::default()
        };
        let mut system = AdaptiveLearningSystem::new(config).unwrap();
        system.ingest(fp("a", "dog"), Utc::now());
        assert!(!system.needs_flush());
        system.ingest(fp("b", "dog"), Utc::now());
        assert!(system.needs_flush());
        system.mark_flushed();
        assert!(!system.needs_flush());
    }

    #[test]
    fn test_snapshot_restore() {
        let mut system = system();
        let now = Utc::now();
        system.set_environment(EnvironmentContext::default(), now);
        for i in 0..5 {
            system.ingest(fp(&format!("t{}", i), "toy"), now);
        }
        system.adapt(now);

        let restored = AdaptiveLearningSystem::restore(LearningConfig::default(), system.snapshot()).unwrap();
        assert_eq!(restored.snapshot(), system.snapshot());
        assert_eq!(restored.adjustment_snapshot(), system.adjustment_snapshot());
    }
}
