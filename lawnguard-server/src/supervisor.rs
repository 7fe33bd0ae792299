//! Integration & health supervisor.
//!
//! Applies learning adjustments to live detections and tracks system
//! performance against the configured targets. Owned by a single task; every
//! operation takes the current time explicitly.

use crate::config::{AdjustmentMode, PerformanceTargets, SupervisorConfig};
use chrono::{DateTime, Utc};
use lawnguard_core::{Detection, OutboundMessage};
use lawnguard_learn::{AdjustmentSnapshot, ModelPerformanceMetrics};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info, warn};

/// One missed performance target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetViolation {
    Accuracy { value: f64, target: f64 },
    FalsePositiveRate { value: f64, target: f64 },
    Latency { value: f64, target: f64 },
}

impl fmt::Display for TargetViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetViolation::Accuracy { value, target } => {
                write!(f, "accuracy {:.3} below {:.3}", value, target)
            }
            TargetViolation::FalsePositiveRate { value, target } => {
                write!(f, "false_positive_rate {:.3} above {:.3}", value, target)
            }
            TargetViolation::Latency { value, target } => {
                write!(f, "latency {:.1}ms above {:.1}ms", value, target)
            }
        }
    }
}

/// Compare current figures against the targets
pub fn check_targets(
    targets: &PerformanceTargets,
    accuracy: Option<f64>,
    false_positive_rate: Option<f64>,
    latency_ms: f64,
) -> Vec<TargetViolation> {
    let mut violations = Vec::new();
    if let Some(value) = accuracy.filter(|a| *a < targets.min_accuracy) {
        violations.push(TargetViolation::Accuracy {
            value,
            target: targets.min_accuracy,
        });
    }
    if let Some(value) = false_positive_rate.filter(|r| *r > targets.max_false_positive_rate) {
        violations.push(TargetViolation::FalsePositiveRate {
            value,
            target: targets.max_false_positive_rate,
        });
    }
    if latency_ms > targets.max_latency_ms {
        violations.push(TargetViolation::Latency {
            value: latency_ms,
            target: targets.max_latency_ms,
        });
    }
    violations
}

/// One entry of the rolling performance history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub timestamp: DateTime<Utc>,
    /// `None` until the learning system has computed metrics
    pub accuracy: Option<f64>,
    pub false_positive_rate: Option<f64>,
    /// When the metrics above were computed
    pub metrics_at: Option<DateTime<Utc>>,
    pub latency_ms: f64,
    pub detections: usize,
    pub violations: Vec<TargetViolation>,
}

/// Summary over the most recent records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub recent_count: usize,
    pub samples: usize,
    pub average_accuracy: Option<f64>,
    pub average_false_positive_rate: Option<f64>,
    pub average_latency_ms: f64,
    pub max_latency_ms: f64,
    pub records_with_violations: usize,
    pub targets: PerformanceTargets,
    pub total_records: u64,
    pub alerts_raised: u64,
}

/// Result of a monitoring tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorOutcome {
    pub stale: bool,
    pub idle_secs: f64,
    /// Rolling accuracy drop that warrants re-adaptation
    pub accuracy_drop: Option<f64>,
}

pub struct IntegrationSupervisor {
    config: SupervisorConfig,
    enabled: bool,
    history: VecDeque<PerformanceRecord>,
    total_records: u64,
    alerts_raised: u64,
    started_at: DateTime<Utc>,
    last_activity: Option<DateTime<Utc>>,
    /// Latest metrics computation already used for a drop trigger
    last_drop_trigger: Option<DateTime<Utc>>,
}

impl IntegrationSupervisor {
    pub fn new(config: SupervisorConfig, now: DateTime<Utc>) -> Self {
        let capacity = config.history_capacity;
        Self {
            config,
            enabled: true,
            history: VecDeque::with_capacity(capacity),
            total_records: 0,
            alerts_raised: 0,
            started_at: now,
            last_activity: None,
            last_drop_trigger: None,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            info!("Integration supervisor {}", if enabled { "enabled" } else { "disabled" });
        }
        self.enabled = enabled;
    }

    pub fn targets(&self) -> PerformanceTargets {
        self.config.targets
    }

    pub fn set_targets(&mut self, targets: PerformanceTargets) -> Result<(), String> {
        targets.validate()?;
        info!(
            "Performance targets: accuracy >= {:.3}, fpr <= {:.3}, latency <= {:.0}ms",
            targets.min_accuracy, targets.max_false_positive_rate, targets.max_latency_ms
        );
        self.config.targets = targets;
        Ok(())
    }

    pub fn history(&self) -> &VecDeque<PerformanceRecord> {
        &self.history
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_activity
    }

    /// Apply learning adjustments and drop detections below the adjusted threshold
    pub fn apply_adjustments(&self, detections: Vec<Detection>, adjustments: &AdjustmentSnapshot) -> Vec<Detection> {
        let before = detections.len();
        let threshold = self.config.global_threshold;

        let accepted: Vec<Detection> = detections
            .into_iter()
            .filter_map(|mut detection| {
                let adjustment = adjustments.confidence_adjustment(detection.category);
                match self.config.adjustment_mode {
                    AdjustmentMode::ThresholdOnly => {
                        (detection.confidence >= threshold + adjustment).then_some(detection)
                    }
                    AdjustmentMode::LegacyDouble => {
                        let adjusted = (detection.confidence - adjustment).clamp(0.0, 1.0);
                        if adjusted >= threshold + adjustment {
                            detection.confidence = adjusted;
                            Some(detection)
                        } else {
                            None
                        }
                    }
                }
            })
            .collect();

        if accepted.len() < before {
            debug!("Adjusted threshold rejected {} of {} detections", before - accepted.len(), before);
        }
        accepted
    }

    /// Record one pipeline cycle; returns an alert when a target is missed
    pub fn record_cycle(
        &mut self,
        latency_ms: f64,
        detections: usize,
        metrics: Option<&ModelPerformanceMetrics>,
        now: DateTime<Utc>,
    ) -> Option<OutboundMessage> {
        let accuracy = metrics.map(|m| m.accuracy);
        let false_positive_rate = metrics.map(|m| m.false_positive_rate);
        let violations = check_targets(&self.config.targets, accuracy, false_positive_rate, latency_ms);

        if self.history.len() == self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(PerformanceRecord {
            timestamp: now,
            accuracy,
            false_positive_rate,
            metrics_at: metrics.map(|m| m.computed_at),
            latency_ms,
            detections,
            violations: violations.clone(),
        });
        self.total_records += 1;
        self.last_activity = Some(now);

        if violations.is_empty() {
            return None;
        }

        self.alerts_raised += 1;
        let violations: Vec<String> = violations.iter().map(ToString::to_string).collect();
        warn!("Performance targets missed: {}", violations.join(", "));
        // unknown figures are published as null
        Some(OutboundMessage::PerformanceAlert {
            violations,
            accuracy: accuracy.unwrap_or(f64::NAN),
            false_positive_rate: false_positive_rate.unwrap_or(f64::NAN),
            latency_ms,
        })
    }

    /// Monitoring tick: staleness and rolling accuracy drop
    pub fn monitor(&mut self, now: DateTime<Utc>) -> MonitorOutcome {
        let since = self.last_activity.unwrap_or(self.started_at);
        let idle_secs = (now - since).num_milliseconds().max(0) as f64 / 1000.0;
        let stale = idle_secs > self.config.stale_after_secs as f64;
        if stale {
            warn!("No pipeline activity for {:.0}s", idle_secs);
        }

        let accuracy_drop = self.accuracy_drop();
        MonitorOutcome {
            stale,
            idle_secs,
            accuracy_drop,
        }
    }

    /// Compare the last two windows of distinct metric computations
    fn accuracy_drop(&mut self) -> Option<f64> {
        let window = self.config.accuracy_drop_window;

        let mut samples: Vec<(DateTime<Utc>, f64)> = Vec::new();
        for record in &self.history {
            if let (Some(at), Some(accuracy)) = (record.metrics_at, record.accuracy) {
                if samples.last().map(|(last, _)| *last) != Some(at) {
                    samples.push((at, accuracy));
                }
            }
        }
        if samples.len() < window * 2 {
            return None;
        }

        let recent = &samples[samples.len() - window..];
        let previous = &samples[samples.len() - window * 2..samples.len() - window];
        let mean = |s: &[(DateTime<Utc>, f64)]| s.iter().map(|(_, a)| a).sum::<f64>() / s.len() as f64;
        let drop = mean(previous) - mean(recent);
        let latest = recent.last().map(|(at, _)| *at);

        if drop > self.config.accuracy_drop_threshold && latest != self.last_drop_trigger {
            warn!("Rolling accuracy dropped by {:.3}", drop);
            self.last_drop_trigger = latest;
            Some(drop)
        } else {
            None
        }
    }

    /// Whether the most recent record missed a target
    pub fn has_recent_violations(&self) -> bool {
        self.history.back().is_some_and(|r| !r.violations.is_empty())
    }

    pub fn report(&self, recent_count: usize) -> PerformanceReport {
        let recent: Vec<&PerformanceRecord> = self.history.iter().rev().take(recent_count).collect();
        let samples = recent.len();

        let average = |values: Vec<f64>| {
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
        };

        PerformanceReport {
            recent_count,
            samples,
            average_accuracy: average(recent.iter().filter_map(|r| r.accuracy).collect()),
            average_false_positive_rate: average(recent.iter().filter_map(|r| r.false_positive_rate).collect()),
            average_latency_ms: average(recent.iter().map(|r| r.latency_ms).collect()).unwrap_or(0.0),
            max_latency_ms: recent.iter().map(|r| r.latency_ms).fold(0.0, f64::max),
            records_with_violations: recent.iter().filter(|r| !r.violations.is_empty()).count(),
            targets: self.config.targets,
            total_records: self.total_records,
            alerts_raised: self.alerts_raised,
        }
    }
}
