//! Safety response state machine.
//!
//! Detections drive transitions between response tiers; the only external
//! commands are manual override, false-positive reports and clearing a
//! latched emergency stop. Every operation takes the current time explicitly
//! and returns the outbound messages it wants published; delivery belongs to
//! [`crate::service::SafetyService`].

use crate::config::SafetyConfig;
use crate::error::CnsError;
use crate::policy::{PolicyTable, ResponsePolicy};
use lawnguard_core::{Detection, OutboundMessage, ResponseTier, SafetyLevel};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// In-flight response to one detection
#[derive(Debug, Clone)]
pub struct ActiveResponse {
    pub detection_id: String,
    pub tier: ResponseTier,
    pub started_at: Instant,
    /// Policy in force when the response was created
    pub policy: ResponsePolicy,
    pub detection: Detection,
    pub retry_count: u32,
}

#[derive(Debug, Clone)]
struct ManualOverride {
    kind: String,
    expires_at: Instant,
}

/// Lifetime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyStats {
    pub critical_detections: u64,
    pub emergency_stops: u64,
    pub emergency_stop_failures: u64,
    pub responses_created: u64,
    pub retries: u64,
    pub escalations: u64,
    pub clearances: u64,
    pub ignored_during_override: u64,
    pub suppressed_skips: u64,
}

/// Summary of one active response for status reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveResponseSummary {
    pub detection_id: String,
    pub category: String,
    pub tier: ResponseTier,
    pub distance_m: f64,
    pub retry_count: u32,
    pub elapsed_s: f64,
}

/// Published state machine status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyStatus {
    pub current_tier: ResponseTier,
    pub active_responses: Vec<ActiveResponseSummary>,
    pub override_active: bool,
    pub override_kind: Option<String>,
    pub override_remaining_s: Option<f64>,
    pub suppressed_ids: usize,
    pub emergency_stop_latched: bool,
    pub last_actuation_error: Option<String>,
    pub stats: SafetyStats,
}

/// Graduated safety response state machine
pub struct SafetyStateMachine {
    config: SafetyConfig,
    policies: PolicyTable,
    current_tier: ResponseTier,
    active: BTreeMap<String, ActiveResponse>,
    manual_override: Option<ManualOverride>,
    suppressed: HashSet<String>,
    emergency_stop_latched: bool,
    emergency_stop_failed: bool,
    stats: SafetyStats,
}

impl SafetyStateMachine {
    pub fn new(config: SafetyConfig, policies: PolicyTable) -> Result<Self, CnsError> {
        config.validate().map_err(CnsError::Config)?;

        Ok(Self {
            config,
            policies,
            current_tier: ResponseTier::Continue,
            active: BTreeMap::new(),
            manual_override: None,
            suppressed: HashSet::new(),
            emergency_stop_latched: false,
            emergency_stop_failed: false,
            stats: SafetyStats::default(),
        })
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn current_tier(&self) -> ResponseTier {
        self.current_tier
    }

    pub fn active_response(&self, detection_id: &str) -> Option<&ActiveResponse> {
        self.active.get(detection_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn stats(&self) -> SafetyStats {
        self.stats
    }

    pub fn is_suppressed(&self, detection_id: &str) -> bool {
        self.suppressed.contains(detection_id)
    }

    pub fn is_override_active(&self, now: Instant) -> bool {
        self.manual_override
            .as_ref()
            .is_some_and(|o| now < o.expires_at)
    }

    fn expire_override(&mut self, now: Instant) {
        if let Some(o) = &self.manual_override {
            if now >= o.expires_at {
                info!("Manual override '{}' expired", o.kind);
                self.manual_override = None;
            }
        }
    }

    fn ignore_during_override(&mut self, detections: &[Detection]) {
        for detection in detections {
            warn!(
                "Manual override active, ignoring {} detection '{}' ({}) at {:.1}m",
                detection.safety_level, detection.object_id, detection.category, detection.distance_m
            );
        }
        self.stats.ignored_during_override += detections.len() as u64;
    }

    /// Critical path: any CRITICAL detection stops the machine at once.
    ///
    /// Every qualifying detection is logged; one emergency stop is issued per
    /// latch. While already latched the stop is not repeated unless the last
    /// one failed.
    pub fn handle_critical(&mut self, detections: &[Detection], now: Instant) -> Vec<OutboundMessage> {
        self.expire_override(now);

        let critical: Vec<&Detection> = detections.iter().filter(|d| d.is_critical()).collect();
        if critical.is_empty() {
            return Vec::new();
        }

        if self.is_override_active(now) {
            let owned: Vec<Detection> = critical.into_iter().cloned().collect();
            self.ignore_during_override(&owned);
            return Vec::new();
        }

        self.stats.critical_detections += critical.len() as u64;
        let mut timeout_ms = u64::MAX;
        for detection in &critical {
            let policy = self.policies.resolve(detection.category, SafetyLevel::Critical);
            timeout_ms = timeout_ms.min(policy.action_timeout_ms.max(1));
            warn!(
                "CRITICAL {} '{}' at {:.2}m (confidence {:.2})",
                detection.category, detection.object_id, detection.distance_m, detection.confidence
            );
        }

        if !self.latch_emergency_stop() {
            return Vec::new();
        }

        let nearest = critical
            .iter()
            .min_by(|a, b| a.distance_m.total_cmp(&b.distance_m))
            .copied();
        let mut messages = Vec::with_capacity(critical.len() + 1);
        if let Some(nearest) = nearest {
            messages.push(OutboundMessage::EmergencyStop {
                reason: format!("critical {} at {:.1}m", nearest.category, nearest.distance_m),
                severity: SafetyLevel::Critical,
                timeout_ms,
            });
        }
        for detection in critical {
            let policy = self.policies.resolve(detection.category, SafetyLevel::Critical);
            messages.push(OutboundMessage::MlAlert {
                detection: detection.clone(),
                response: ResponseTier::EmergencyStop,
                clearance_m: policy.required_clearance_m,
            });
        }
        self.stats.emergency_stops += 1;
        messages
    }

    /// Graduated path for one cycle of (non-critical) detections
    pub fn handle_detections(&mut self, detections: &[Detection], now: Instant) -> Vec<OutboundMessage> {
        self.expire_override(now);
        if detections.is_empty() {
            return Vec::new();
        }

        if self.is_override_active(now) {
            self.ignore_during_override(detections);
            return Vec::new();
        }

        let mut messages = self.apply_clearance(detections);

        let mut groups: BTreeMap<ResponseTier, Vec<(&Detection, ResponsePolicy)>> = BTreeMap::new();
        for detection in detections {
            if detection.is_critical() {
                continue;
            }
            if self.suppressed.contains(&detection.object_id) {
                self.stats.suppressed_skips += 1;
                continue;
            }
            let policy = self.policies.resolve(detection.category, detection.safety_level);
            if policy.tier == ResponseTier::Continue {
                continue;
            }
            if detection.distance_m > self.clearance_threshold(&policy) {
                continue;
            }
            groups.entry(policy.tier).or_default().push((detection, policy));
        }

        let selected = groups.into_iter().next_back().and_then(|(tier, group)| {
            debug!("Acting on {} group of {}", tier, group.len());
            group.into_iter().max_by(|(a, _), (b, _)| self.rank(a, b))
        });

        if let Some((detection, policy)) = selected {
            let detection = detection.clone();
            messages.extend(self.execute(detection, policy, now));
        }

        self.recompute_tier();
        messages
    }

    /// Nearest, most confident first: compares `(confidence, 1 / max(distance, floor))`
    fn rank(&self, a: &Detection, b: &Detection) -> std::cmp::Ordering {
        let floor = self.config.min_rank_distance_m;
        let proximity = |d: &Detection| 1.0 / d.distance_m.max(floor);
        a.confidence
            .total_cmp(&b.confidence)
            .then_with(|| proximity(a).total_cmp(&proximity(b)))
    }

    /// Latch the emergency stop; returns false when a delivered stop is already latched
    fn latch_emergency_stop(&mut self) -> bool {
        let repeat = self.emergency_stop_latched && !self.emergency_stop_failed;
        self.emergency_stop_latched = true;
        self.emergency_stop_failed = false;
        self.current_tier = ResponseTier::EmergencyStop;
        if repeat {
            debug!("Emergency stop already latched");
        }
        !repeat
    }

    fn clearance_threshold(&self, policy: &ResponsePolicy) -> f64 {
        policy.required_clearance_m * self.config.clearance_factor
    }

    fn execute(&mut self, detection: Detection, policy: ResponsePolicy, now: Instant) -> Vec<OutboundMessage> {
        if policy.tier == ResponseTier::EmergencyStop {
            if !self.latch_emergency_stop() {
                return Vec::new();
            }
            warn!("Policy escalates '{}' straight to emergency stop", detection.object_id);
            self.stats.emergency_stops += 1;
            let mut messages = tier_actions(&self.config, policy.tier, &detection, &policy);
            messages.push(alert(&detection, policy.tier, &policy));
            return messages;
        }

        match self.active.get_mut(&detection.object_id) {
            Some(response) => {
                let raised = policy.tier > response.tier;
                response.detection = detection;
                if !raised {
                    return Vec::new();
                }
                info!(
                    "Raising response for '{}' from {} to {}",
                    response.detection_id, response.tier, policy.tier
                );
                response.tier = policy.tier;
                response.policy = policy;
                response.started_at = now;
                response.retry_count = 0;
                let mut messages = tier_actions(&self.config, policy.tier, &response.detection, &policy);
                messages.push(alert(&response.detection, policy.tier, &policy));
                messages
            }
            None => {
                info!(
                    "{} for {} '{}' at {:.1}m",
                    policy.tier, detection.category, detection.object_id, detection.distance_m
                );
                let mut messages = tier_actions(&self.config, policy.tier, &detection, &policy);
                messages.push(alert(&detection, policy.tier, &policy));
                self.active.insert(
                    detection.object_id.clone(),
                    ActiveResponse {
                        detection_id: detection.object_id.clone(),
                        tier: policy.tier,
                        started_at: now,
                        policy,
                        detection,
                        retry_count: 0,
                    },
                );
                self.stats.responses_created += 1;
                messages
            }
        }
    }

    /// Clear responses whose object moved beyond the clearance distance
    fn apply_clearance(&mut self, detections: &[Detection]) -> Vec<OutboundMessage> {
        let mut cleared = false;
        for detection in detections {
            let Some(response) = self.active.get(&detection.object_id) else {
                continue;
            };
            let threshold = self.clearance_threshold(&response.policy);
            if detection.distance_m > threshold {
                info!(
                    "'{}' cleared at {:.1}m (needed {:.1}m)",
                    detection.object_id, detection.distance_m, threshold
                );
                self.active.remove(&detection.object_id);
                self.stats.clearances += 1;
                cleared = true;
            }
        }

        if cleared && self.active.is_empty() {
            self.all_clear("clearance achieved")
        } else {
            Vec::new()
        }
    }

    /// Called when the last active response went away
    fn all_clear(&mut self, reason: &str) -> Vec<OutboundMessage> {
        if self.emergency_stop_latched {
            debug!("All responses cleared but emergency stop stays latched");
            self.current_tier = ResponseTier::EmergencyStop;
            return Vec::new();
        }
        self.current_tier = ResponseTier::Continue;
        vec![OutboundMessage::NavigationResume {
            reason: reason.to_string(),
        }]
    }

    fn recompute_tier(&mut self) {
        self.current_tier = if self.emergency_stop_latched {
            ResponseTier::EmergencyStop
        } else {
            self.active
                .values()
                .map(|r| r.tier)
                .max()
                .unwrap_or(ResponseTier::Continue)
        };
    }

    /// Supervision tick: retry, escalate or clear overdue responses
    pub fn supervise(&mut self, now: Instant) -> Vec<OutboundMessage> {
        self.expire_override(now);

        let mut messages = Vec::new();
        let mut removed = false;
        let ids: Vec<String> = self.active.keys().cloned().collect();

        for id in ids {
            let Some(response) = self.active.get_mut(&id) else {
                continue;
            };
            let elapsed = now.saturating_duration_since(response.started_at).as_secs_f64();
            if elapsed <= response.policy.escalation_time_s {
                continue;
            }

            if response.retry_count < response.policy.retry_attempts {
                response.retry_count += 1;
                response.started_at = now;
                self.stats.retries += 1;
                info!(
                    "Retrying {} for '{}' ({}/{})",
                    response.tier, id, response.retry_count, response.policy.retry_attempts
                );
                messages.extend(tier_actions(&self.config, response.tier, &response.detection, &response.policy));
                continue;
            }

            match response.tier.escalate() {
                Some(next) => {
                    warn!("Escalating '{}' from {} to {}", id, response.tier, next);
                    response.tier = next;
                    response.started_at = now;
                    response.retry_count = 0;
                    self.stats.escalations += 1;
                    messages.extend(tier_actions(&self.config, next, &response.detection, &response.policy));
                    messages.push(alert(&response.detection, next, &response.policy));
                    if next == ResponseTier::EmergencyStop {
                        self.stats.emergency_stops += 1;
                    }
                }
                None => {
                    info!("Clearing '{}' after exhausting the top tier", id);
                    self.active.remove(&id);
                    removed = true;
                }
            }
        }

        if removed && self.active.is_empty() {
            messages.extend(self.all_clear("response expired"));
        }
        self.recompute_tier();
        messages
    }

    /// Engage manual override for `duration`
    pub fn enable_override(&mut self, kind: impl Into<String>, duration: Duration, now: Instant) -> Vec<OutboundMessage> {
        let kind = kind.into();
        let cleared = self.active.len();
        let previous = self.current_tier;

        self.active.clear();
        self.emergency_stop_latched = false;
        self.emergency_stop_failed = false;
        self.current_tier = ResponseTier::Continue;
        warn!(
            "Manual override '{}' engaged for {:.0}s, cleared {} responses",
            kind,
            duration.as_secs_f64(),
            cleared
        );
        self.manual_override = Some(ManualOverride {
            kind,
            expires_at: now + duration,
        });

        if previous != ResponseTier::Continue {
            vec![OutboundMessage::NavigationResume {
                reason: "manual override".to_string(),
            }]
        } else {
            Vec::new()
        }
    }

    /// Disengage manual override; returns whether one was active
    pub fn disable_override(&mut self, now: Instant) -> bool {
        self.expire_override(now);
        match self.manual_override.take() {
            Some(o) => {
                info!("Manual override '{}' disabled", o.kind);
                true
            }
            None => false,
        }
    }

    /// Suppress a detection id for the rest of the session
    pub fn report_false_positive(&mut self, detection_id: &str) -> Vec<OutboundMessage> {
        info!("Suppressing '{}' as a false positive", detection_id);
        self.suppressed.insert(detection_id.to_string());

        let mut messages = Vec::new();
        if self.active.remove(detection_id).is_some() {
            self.stats.clearances += 1;
            if self.active.is_empty() {
                messages = self.all_clear("false positive");
            }
        }
        self.recompute_tier();
        messages
    }

    /// Release a latched emergency stop
    pub fn clear_emergency_stop(&mut self) -> Vec<OutboundMessage> {
        if !self.emergency_stop_latched {
            return Vec::new();
        }
        info!("Emergency stop cleared");
        self.emergency_stop_latched = false;
        self.emergency_stop_failed = false;
        self.recompute_tier();
        if self.current_tier == ResponseTier::Continue {
            vec![OutboundMessage::NavigationResume {
                reason: "emergency stop cleared".to_string(),
            }]
        } else {
            Vec::new()
        }
    }

    /// Record that an emergency stop could not be delivered
    pub fn record_emergency_stop_failure(&mut self) {
        self.emergency_stop_failed = true;
        self.stats.emergency_stop_failures += 1;
    }

    pub fn status(&self, now: Instant) -> SafetyStatus {
        let active_override = self.manual_override.as_ref().filter(|o| now < o.expires_at);
        SafetyStatus {
            current_tier: self.current_tier,
            active_responses: self
                .active
                .values()
                .map(|r| ActiveResponseSummary {
                    detection_id: r.detection_id.clone(),
                    category: r.detection.category.to_string(),
                    tier: r.tier,
                    distance_m: r.detection.distance_m,
                    retry_count: r.retry_count,
                    elapsed_s: now.saturating_duration_since(r.started_at).as_secs_f64(),
                })
                .collect(),
            override_active: active_override.is_some(),
            override_kind: active_override.map(|o| o.kind.clone()),
            override_remaining_s: active_override.map(|o| o.expires_at.saturating_duration_since(now).as_secs_f64()),
            suppressed_ids: self.suppressed.len(),
            emergency_stop_latched: self.emergency_stop_latched,
            last_actuation_error: None,
            stats: self.stats,
        }
    }
}

/// Actuation commands for a tier
fn tier_actions(
    config: &SafetyConfig,
    tier: ResponseTier,
    detection: &Detection,
    policy: &ResponsePolicy,
) -> Vec<OutboundMessage> {
    let reason = format!(
        "{} {} at {:.1}m",
        detection.safety_level, detection.category, detection.distance_m
    );
    match tier {
        ResponseTier::Continue => Vec::new(),
        ResponseTier::SlowDown => vec![OutboundMessage::NavigationSetSpeed {
            speed_factor: config.slow_down_speed_factor,
            reason,
        }],
        ResponseTier::StopAndAssess => vec![OutboundMessage::NavigationStop {
            reason,
            detection_id: Some(detection.object_id.clone()),
        }],
        ResponseTier::Retreat => vec![OutboundMessage::NavigationRetreat {
            distance_m: policy.required_clearance_m,
            reason,
        }],
        ResponseTier::EmergencyStop => vec![OutboundMessage::EmergencyStop {
            reason,
            severity: detection.safety_level,
            timeout_ms: policy.action_timeout_ms.max(1),
        }],
    }
}

fn alert(detection: &Detection, tier: ResponseTier, policy: &ResponsePolicy) -> OutboundMessage {
    OutboundMessage::MlAlert {
        detection: detection.clone(),
        response: tier,
        clearance_m: policy.required_clearance_m,
    }
}
