//! Operating environment snapshots and change detection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weather {
    #[default]
    Clear,
    Cloudy,
    Rain,
    Fog,
}

impl Weather {
    pub fn as_str(&self) -> &'static str {
        match self {
            Weather::Clear => "clear",
            Weather::Cloudy => "cloudy",
            Weather::Rain => "rain",
            Weather::Fog => "fog",
        }
    }

    /// Visibility score in [0, 1] used as a learning feature
    pub fn visibility_score(&self) -> f64 {
        match self {
            Weather::Clear => 1.0,
            Weather::Cloudy => 0.8,
            Weather::Rain => 0.5,
            Weather::Fog => 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrassCondition {
    #[default]
    Dry,
    Wet,
    Long,
}

impl GrassCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrassCondition::Dry => "dry",
            GrassCondition::Wet => "wet",
            GrassCondition::Long => "long",
        }
    }
}

/// Snapshot of the conditions the robot is operating in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentContext {
    /// Ambient light, 0.0 (dark) to 1.0 (full sun)
    pub lighting: f64,
    pub weather: Weather,
    pub grass: GrassCondition,
    /// Obstacles per square metre of the current work area
    pub obstacle_density: f64,
    pub temperature_c: f64,
}

impl Default for EnvironmentContext {
    fn default() -> Self {
        Self {
            lighting: 0.8,
            weather: Weather::Clear,
            grass: GrassCondition::Dry,
            obstacle_density: 0.1,
            temperature_c: 20.0,
        }
    }
}

impl EnvironmentContext {
    pub fn key(&self) -> EnvironmentKey {
        EnvironmentKey {
            lighting: LightingBand::from_level(self.lighting),
            weather: self.weather,
        }
    }

    /// Names of the fields that changed significantly since `previous`.
    ///
    /// Numeric fields count when they moved by more than `ratio` relative to
    /// their previous value; categorical fields count on any change.
    pub fn significant_changes(&self, previous: &EnvironmentContext, ratio: f64) -> Vec<&'static str> {
        let mut changed = Vec::new();

        let numeric = [
            ("lighting", previous.lighting, self.lighting),
            ("obstacle_density", previous.obstacle_density, self.obstacle_density),
            ("temperature_c", previous.temperature_c, self.temperature_c),
        ];
        for (name, before, after) in numeric {
            if relative_change(before, after) > ratio {
                changed.push(name);
            }
        }

        if self.weather != previous.weather {
            changed.push("weather");
        }
        if self.grass != previous.grass {
            changed.push("grass");
        }

        changed
    }
}

fn relative_change(before: f64, after: f64) -> f64 {
    let delta = (after - before).abs();
    if before.abs() < f64::EPSILON {
        if delta < f64::EPSILON {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        delta / before.abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightingBand {
    Dark,
    Dim,
    Bright,
}

impl LightingBand {
    pub fn from_level(level: f64) -> Self {
        if level < 0.3 {
            LightingBand::Dark
        } else if level < 0.7 {
            LightingBand::Dim
        } else {
            LightingBand::Bright
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LightingBand::Dark => "dark",
            LightingBand::Dim => "dim",
            LightingBand::Bright => "bright",
        }
    }
}

/// Coarse environment bucket that environment-scoped adjustments are keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnvironmentKey {
    pub lighting: LightingBand,
    pub weather: Weather,
}

impl fmt::Display for EnvironmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.lighting.as_str(), self.weather.as_str())
    }
}

/// One entry of the environment history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub recorded_at: DateTime<Utc>,
    pub context: EnvironmentContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_buckets() {
        let mut ctx = EnvironmentContext::default();
        assert_eq!(ctx.key().to_string(), "bright_clear");

        ctx.lighting = 0.1;
        ctx.weather = Weather::Rain;
        assert_eq!(ctx.key().to_string(), "dark_rain");
    }

    #[test]
    fn test_significant_changes() {
        let before = EnvironmentContext::default();

        let mut small = before.clone();
        small.lighting = 0.85;
        assert!(small.significant_changes(&before, 0.2).is_empty());

        let mut big = before.clone();
        big.lighting = 0.3;
        big.weather = Weather::Fog;
        let changed = big.significant_changes(&before, 0.2);
        assert_eq!(changed, vec!["lighting", "weather"]);
    }

    #[test]
    fn test_change_from_zero() {
        let mut before = EnvironmentContext::default();
        before.obstacle_density = 0.0;
        let mut after = before.clone();
        assert!(after.significant_changes(&before, 0.2).is_empty());
        after.obstacle_density = 0.05;
        assert_eq!(after.significant_changes(&before, 0.2), vec!["obstacle_density"]);
    }
}
