//! Confidence adjustment table

use crate::environment::EnvironmentKey;
use lawnguard_core::ObjectCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Adjustment scope: a category, optionally narrowed to one environment bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdjustmentKey {
    pub category: ObjectCategory,
    pub environment: Option<EnvironmentKey>,
}

impl AdjustmentKey {
    pub fn global(category: ObjectCategory) -> Self {
        Self {
            category,
            environment: None,
        }
    }

    pub fn scoped(category: ObjectCategory, environment: EnvironmentKey) -> Self {
        Self {
            category,
            environment: Some(environment),
        }
    }
}

impl fmt::Display for AdjustmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.environment {
            Some(env) => write!(f, "{}/{}", self.category, env),
            None => write!(f, "{}", self.category),
        }
    }
}

/// Persisted form of one table entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentEntry {
    pub key: AdjustmentKey,
    pub value: f64,
}

/// Per-category and per-environment confidence adjustments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdjustmentTable {
    values: BTreeMap<AdjustmentKey, f64>,
}

impl AdjustmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &AdjustmentKey) -> f64 {
        self.values.get(key).copied().unwrap_or(0.0)
    }

    /// Add `delta` to an entry, keeping it within `[-cap, cap]`
    pub fn nudge(&mut self, key: AdjustmentKey, delta: f64, cap: f64) -> f64 {
        let value = (self.get(&key) + delta).clamp(-cap, cap);
        self.values.insert(key, value);
        value
    }

    /// Scale every entry by `factor`; entries below `snap` in magnitude are removed
    pub fn decay(&mut self, factor: f64, snap: f64) {
        for value in self.values.values_mut() {
            *value *= factor;
        }
        self.values.retain(|_, value| value.abs() >= snap);
    }

    /// `clip(base + weight * environment, -limit, limit)`
    pub fn query(&self, category: ObjectCategory, environment: Option<EnvironmentKey>, weight: f64, limit: f64) -> f64 {
        let base = self.get(&AdjustmentKey::global(category));
        let scoped = environment
            .map(|env| self.get(&AdjustmentKey::scoped(category, env)))
            .unwrap_or(0.0);
        (base + weight * scoped).clamp(-limit, limit)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn entries(&self) -> Vec<AdjustmentEntry> {
        self.values
            .iter()
            .map(|(key, value)| AdjustmentEntry {
                key: *key,
                value: *value,
            })
            .collect()
    }

    pub fn from_entries(entries: &[AdjustmentEntry]) -> Self {
        Self {
            values: entries.iter().map(|e| (e.key, e.value)).collect(),
        }
    }
}
