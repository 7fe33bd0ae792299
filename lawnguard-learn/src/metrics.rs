//! Rolling detection quality metrics

use crate::feedback::{LearningExample, Outcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const CALIBRATION_BINS: usize = 10;

/// Quality metrics derived from labelled examples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformanceMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub false_positive_rate: f64,
    pub false_negative_rate: f64,
    /// 1 - expected calibration error
    pub calibration_quality: f64,
    /// Accuracy keyed by environment bucket
    pub environment_accuracy: BTreeMap<String, f64>,
    pub sample_count: usize,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    tp: usize,
    fp: usize,
    fn_: usize,
    tn: usize,
}

impl Counts {
    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::TruePositive => self.tp += 1,
            Outcome::FalsePositive => self.fp += 1,
            Outcome::FalseNegative => self.fn_ += 1,
            Outcome::TrueNegative => self.tn += 1,
        }
    }

    fn total(&self) -> usize {
        self.tp + self.fp + self.fn_ + self.tn
    }

    fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl ModelPerformanceMetrics {
    /// Compute metrics over the examples that carry ground truth.
    ///
    /// Returns `None` when none of them do.
    pub fn compute<'a, I>(examples: I, now: DateTime<Utc>) -> Option<Self>
    where
        I: IntoIterator<Item = &'a LearningExample>,
    {
        let mut counts = Counts::default();
        let mut per_environment: BTreeMap<String, Counts> = BTreeMap::new();
        let mut bins = [(0usize, 0.0f64, 0usize); CALIBRATION_BINS];
        let mut predicted = 0usize;

        for example in examples {
            let Some(outcome) = example.outcome() else {
                continue;
            };
            counts.add(outcome);
            per_environment
                .entry(example.environment_context.key().to_string())
                .or_default()
                .add(outcome);

            if example.detected {
                let confidence = example.confidence.clamp(0.0, 1.0);
                let bin = ((confidence * CALIBRATION_BINS as f64) as usize).min(CALIBRATION_BINS - 1);
                bins[bin].0 += 1;
                bins[bin].1 += confidence;
                if outcome == Outcome::TruePositive {
                    bins[bin].2 += 1;
                }
                predicted += 1;
            }
        }

        let total = counts.total();
        if total == 0 {
            return None;
        }

        let precision = ratio(counts.tp, counts.tp + counts.fp);
        let recall = ratio(counts.tp, counts.tp + counts.fn_);
        let f1_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        let ece: f64 = bins
            .iter()
            .filter(|(n, _, _)| *n > 0)
            .map(|(n, confidence_sum, correct)| {
                let avg_confidence = confidence_sum / *n as f64;
                let accuracy = *correct as f64 / *n as f64;
                (*n as f64 / predicted as f64) * (avg_confidence - accuracy).abs()
            })
            .sum();

        Some(Self {
            accuracy: counts.accuracy(),
            precision,
            recall,
            f1_score,
            false_positive_rate: ratio(counts.fp, total),
            false_negative_rate: ratio(counts.fn_, total),
            calibration_quality: 1.0 - ece,
            environment_accuracy: per_environment
                .into_iter()
                .map(|(key, counts)| (key, counts.accuracy()))
                .collect(),
            sample_count: total,
            computed_at: now,
        })
    }
}
