//! Safety response policy table

use lawnguard_core::{ObjectCategory, ResponseTier, SafetyLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Response prescribed for one category and safety level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResponsePolicy {
    pub tier: ResponseTier,
    /// Upper bound on executing the action, in milliseconds
    pub action_timeout_ms: u64,
    /// Distance the object must move beyond before the response clears
    pub required_clearance_m: f64,
    /// Times the action is repeated before escalating
    pub retry_attempts: u32,
    /// Seconds without clearance before a retry or escalation
    pub escalation_time_s: f64,
}

impl ResponsePolicy {
    pub const fn new(
        tier: ResponseTier,
        action_timeout_ms: u64,
        required_clearance_m: f64,
        retry_attempts: u32,
        escalation_time_s: f64,
    ) -> Self {
        Self {
            tier,
            action_timeout_ms,
            required_clearance_m,
            retry_attempts,
            escalation_time_s,
        }
    }

    const fn proceed() -> Self {
        Self::new(ResponseTier::Continue, 0, 0.0, 0, 0.0)
    }
}

/// Static category × safety-level table with an `unknown` fallback row
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<(ObjectCategory, SafetyLevel), ResponsePolicy>,
}

impl PolicyTable {
    pub fn empty() -> Self {
        Self {
            policies: HashMap::new(),
        }
    }

    /// The standard field policy
    pub fn standard() -> Self {
        use ObjectCategory::*;
        use ResponseTier::*;
        use SafetyLevel::{Critical, High, Low, Medium};

        let mut table = Self::empty();

        let rows: [(ObjectCategory, [ResponsePolicy; 4]); 9] = [
            (
                Person,
                [
                    ResponsePolicy::new(EmergencyStop, 100, 6.0, 0, 2.0),
                    ResponsePolicy::new(StopAndAssess, 500, 5.5, 2, 3.0),
                    ResponsePolicy::new(SlowDown, 1000, 8.5, 2, 5.0),
                    ResponsePolicy::proceed(),
                ],
            ),
            (
                Child,
                [
                    ResponsePolicy::new(EmergencyStop, 100, 7.0, 0, 2.0),
                    ResponsePolicy::new(StopAndAssess, 300, 7.0, 2, 2.0),
                    ResponsePolicy::new(SlowDown, 800, 10.5, 2, 4.0),
                    ResponsePolicy::proceed(),
                ],
            ),
            (
                Pet,
                [
                    ResponsePolicy::new(EmergencyStop, 150, 2.0, 0, 2.0),
                    ResponsePolicy::new(StopAndAssess, 500, 3.5, 2, 3.0),
                    ResponsePolicy::new(SlowDown, 1000, 7.0, 2, 5.0),
                    ResponsePolicy::proceed(),
                ],
            ),
            (
                Dog,
                [
                    ResponsePolicy::new(EmergencyStop, 150, 2.0, 0, 2.0),
                    ResponsePolicy::new(StopAndAssess, 500, 3.5, 2, 3.0),
                    ResponsePolicy::new(SlowDown, 1000, 7.0, 2, 5.0),
                    ResponsePolicy::proceed(),
                ],
            ),
            (
                Cat,
                [
                    ResponsePolicy::new(EmergencyStop, 150, 2.0, 0, 2.0),
                    ResponsePolicy::new(StopAndAssess, 500, 3.5, 2, 3.0),
                    ResponsePolicy::new(SlowDown, 1000, 7.0, 2, 5.0),
                    ResponsePolicy::proceed(),
                ],
            ),
            (
                Toy,
                [
                    ResponsePolicy::new(StopAndAssess, 500, 1.0, 1, 3.0),
                    ResponsePolicy::new(StopAndAssess, 500, 1.0, 1, 3.0),
                    ResponsePolicy::new(SlowDown, 1000, 1.0, 1, 5.0),
                    ResponsePolicy::proceed(),
                ],
            ),
            (
                MovingObject,
                [
                    ResponsePolicy::new(EmergencyStop, 100, 3.0, 0, 2.0),
                    ResponsePolicy::new(StopAndAssess, 500, 1.5, 2, 3.0),
                    ResponsePolicy::new(SlowDown, 1000, 4.5, 2, 5.0),
                    ResponsePolicy::proceed(),
                ],
            ),
            (
                StaticObject,
                [
                    ResponsePolicy::new(Retreat, 500, 0.5, 1, 3.0),
                    ResponsePolicy::new(Retreat, 500, 0.5, 1, 3.0),
                    ResponsePolicy::new(SlowDown, 1000, 1.0, 1, 5.0),
                    ResponsePolicy::proceed(),
                ],
            ),
            (
                Unknown,
                [
                    ResponsePolicy::new(EmergencyStop, 100, 3.0, 0, 2.0),
                    ResponsePolicy::new(StopAndAssess, 500, 1.5, 2, 3.0),
                    ResponsePolicy::new(SlowDown, 1000, 3.5, 2, 5.0),
                    ResponsePolicy::proceed(),
                ],
            ),
        ];

        for (category, [critical, high, medium, low]) in rows {
            table.insert(category, Critical, critical);
            table.insert(category, High, high);
            table.insert(category, Medium, medium);
            table.insert(category, Low, low);
        }
        table
    }

    pub fn insert(&mut self, category: ObjectCategory, level: SafetyLevel, policy: ResponsePolicy) {
        self.policies.insert((category, level), policy);
    }

    /// Resolve a policy, falling back to the `unknown` row
    pub fn resolve(&self, category: ObjectCategory, level: SafetyLevel) -> ResponsePolicy {
        if let Some(policy) = self.policies.get(&(category, level)) {
            return *policy;
        }
        debug!("No policy for {}/{}, using unknown row", category, level);
        self.policies
            .get(&(ObjectCategory::Unknown, level))
            .copied()
            .unwrap_or_else(|| Self::last_resort(level))
    }

    /// Used only when the table lacks an `unknown` row for the level
    fn last_resort(level: SafetyLevel) -> ResponsePolicy {
        match level {
            SafetyLevel::Critical => ResponsePolicy::new(ResponseTier::EmergencyStop, 100, 3.0, 0, 2.0),
            SafetyLevel::High => ResponsePolicy::new(ResponseTier::StopAndAssess, 500, 1.5, 2, 3.0),
            SafetyLevel::Medium => ResponsePolicy::new(ResponseTier::SlowDown, 1000, 3.5, 2, 5.0),
            SafetyLevel::Low => ResponsePolicy::proceed(),
        }
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_is_complete() {
        let table = PolicyTable::standard();
        assert_eq!(table.len(), ObjectCategory::ALL.len() * SafetyLevel::ALL.len());
    }

    #[test]
    fn test_critical_humans_emergency_stop() {
        let table = PolicyTable::standard();
        for category in [ObjectCategory::Person, ObjectCategory::Child] {
            let policy = table.resolve(category, SafetyLevel::Critical);
            assert_eq!(policy.tier, ResponseTier::EmergencyStop);
            assert!(policy.action_timeout_ms <= 100);
        }
    }

    #[test]
    fn test_fallback_to_unknown_row() {
        let mut table = PolicyTable::empty();
        let custom = ResponsePolicy::new(ResponseTier::Retreat, 250, 2.0, 1, 1.0);
        table.insert(ObjectCategory::Unknown, SafetyLevel::High, custom);
        assert_eq!(table.resolve(ObjectCategory::Dog, SafetyLevel::High), custom);
        assert_eq!(
            table.resolve(ObjectCategory::Dog, SafetyLevel::Low).tier,
            ResponseTier::Continue
        );
    }

    #[test]
    fn test_clearance_exceeds_level_band() {
        // a detection beyond its clearance threshold must already be in a lower band
        let table = PolicyTable::standard();
        for category in ObjectCategory::ALL {
            let bands = SafetyLevel::distance_bands(category);
            for (level, upper) in [(SafetyLevel::High, bands[1]), (SafetyLevel::Medium, bands[2])] {
                let policy = table.resolve(category, level);
                if policy.tier == ResponseTier::Continue {
                    continue;
                }
                assert!(
                    policy.required_clearance_m * 1.2 >= upper,
                    "{}/{} clears inside its own band",
                    category,
                    level
                );
            }
        }
    }
}
