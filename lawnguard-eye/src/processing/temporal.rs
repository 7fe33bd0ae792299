//! Temporal consistency filtering.
//!
//! One-off false positives are suppressed by requiring repeated confident
//! sightings of the same category in the same coarse image region before a
//! detection is forwarded.

use crate::config::TemporalConfig;
use chrono::{DateTime, Utc};
use lawnguard_core::{Detection, ObjectCategory};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Filter key: category plus coarse spatial bucket of the box centre
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterKey {
    pub category: ObjectCategory,
    pub bucket: (i64, i64),
}

/// Per-key filter state
#[derive(Debug, Clone)]
pub struct FilterState {
    confidences: VecDeque<f64>,
    pub confirmations: u32,
    pub rejections: u32,
    pub last_seen: DateTime<Utc>,
}

impl FilterState {
    fn new(capacity: usize, seen_at: DateTime<Utc>) -> Self {
        Self {
            confidences: VecDeque::with_capacity(capacity),
            confirmations: 0,
            rejections: 0,
            last_seen: seen_at,
        }
    }

    fn push(&mut self, confidence: f64, capacity: usize) {
        if self.confidences.len() == capacity {
            self.confidences.pop_front();
        }
        self.confidences.push_back(confidence);
    }

    pub fn samples(&self) -> usize {
        self.confidences.len()
    }

    pub fn mean(&self) -> f64 {
        if self.confidences.is_empty() {
            return 0.0;
        }
        self.confidences.iter().sum::<f64>() / self.confidences.len() as f64
    }

    pub fn stddev(&self) -> f64 {
        if self.confidences.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self
            .confidences
            .iter()
            .map(|c| (c - mean).powi(2))
            .sum::<f64>()
            / self.confidences.len() as f64;
        variance.sqrt()
    }
}

/// Temporal consistency filter
pub struct TemporalFilter {
    config: TemporalConfig,
    states: HashMap<FilterKey, FilterState>,
}

impl TemporalFilter {
    pub fn new(config: TemporalConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    pub fn key_for(&self, detection: &Detection) -> FilterKey {
        let (cx, cy) = detection.bounding_box.center();
        FilterKey {
            category: detection.category,
            bucket: (
                (cx / self.config.bucket_size_px).floor() as i64,
                (cy / self.config.bucket_size_px).floor() as i64,
            ),
        }
    }

    /// Feed one fused detection; returns it (confidence boosted) once confirmed.
    ///
    /// A re-sighting above the mean threshold counts as a confirmation, one
    /// below it as a rejection. Emission needs at least `min_samples` in the
    /// window with mean above and spread below the configured bounds, and at
    /// least `required_confirmations` confirmations.
    pub fn update(&mut self, detection: Detection) -> Option<Detection> {
        self.evict_stale(detection.observed_at);

        let key = self.key_for(&detection);
        let capacity = self.config.window_size;
        let seen_at = detection.observed_at;

        let resighting = self.states.contains_key(&key);
        let state = self
            .states
            .entry(key)
            .or_insert_with(|| FilterState::new(capacity, seen_at));

        if resighting {
            if detection.confidence > self.config.min_mean_confidence {
                state.confirmations = state.confirmations.saturating_add(1);
            } else {
                state.rejections = state.rejections.saturating_add(1);
            }
        }

        state.push(detection.confidence, capacity);
        state.last_seen = seen_at;

        let consistent = state.samples() >= self.config.min_samples
            && state.mean() > self.config.min_mean_confidence
            && state.stddev() < self.config.max_stddev;

        if consistent && state.confirmations >= self.config.required_confirmations {
            let confidence = (detection.confidence * self.config.confidence_boost).min(1.0);
            Some(Detection {
                confidence,
                ..detection
            })
        } else {
            debug!(
                "Holding '{}' ({}): samples={} mean={:.2} confirmations={}",
                detection.object_id,
                detection.category,
                state.samples(),
                state.mean(),
                state.confirmations
            );
            None
        }
    }

    /// Drop keys not seen within the eviction window
    pub fn evict_stale(&mut self, now: DateTime<Utc>) {
        let max_idle_ms = (self.config.eviction_secs * 1000.0) as i64;
        self.states
            .retain(|_, state| (now - state.last_seen).num_milliseconds() <= max_idle_ms);
    }

    pub fn state(&self, key: &FilterKey) -> Option<&FilterState> {
        self.states.get(key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
