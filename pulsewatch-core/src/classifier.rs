//! Threshold Classification
//!
//! Maps a smoothed heart rate to a severity tier and decides, per alert
//! policy, whether a tier is eligible to alert.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::sample::Bpm;

/// Severity of the current smoothed heart rate, ordered by urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Normal,
    Warning,
    Critical,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Normal => write!(f, "normal"),
            Tier::Warning => write!(f, "warning"),
            Tier::Critical => write!(f, "critical"),
        }
    }
}

/// Alerting policy for a tier that stays elevated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPolicy {
    /// Alert while elevated, at most once per cooldown window.
    #[default]
    CooldownRepeated,
    /// Alert only when the tier rises, never while it is sustained.
    EdgeTriggered,
}

impl std::str::FromStr for AlertPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "cooldown_repeated" | "cooldown" => Ok(AlertPolicy::CooldownRepeated),
            "edge_triggered" | "edge" => Ok(AlertPolicy::EdgeTriggered),
            _ => Err(format!(
                "Invalid alert policy: {}. Must be 'cooldown_repeated' or 'edge_triggered'",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub warning: Bpm,
    pub critical: Bpm,
}

impl ThresholdConfig {
    pub fn new(warning: Bpm, critical: Bpm) -> Result<Self, ConfigError> {
        let config = Self { warning, critical };
        config.validate()?;
        Ok(config)
    }

    /// The value an average must exceed to reach `tier`.
    pub fn threshold_for(&self, tier: Tier) -> Option<Bpm> {
        match tier {
            Tier::Normal => None,
            Tier::Warning => Some(self.warning),
            Tier::Critical => Some(self.critical),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.warning >= self.critical {
            return Err(ConfigError::ThresholdOrder {
                warning: self.warning,
                critical: self.critical,
            });
        }
        Ok(())
    }
}

/// Strict inequality: a value equal to a threshold stays in the lower tier.
pub fn classify(avg: Bpm, config: &ThresholdConfig) -> Tier {
    if avg > config.critical {
        Tier::Critical
    } else if avg > config.warning {
        Tier::Warning
    } else {
        Tier::Normal
    }
}

/// True when the average crossed into its current tier: the previous
/// average was strictly below that tier's threshold. An average sitting
/// exactly on the threshold has not crossed yet, so moving off it is not
/// an edge.
pub fn is_rising_edge(previous_average: Bpm, current_average: Bpm, config: &ThresholdConfig) -> bool {
    match config.threshold_for(classify(current_average, config)) {
        Some(threshold) => previous_average < threshold && current_average > threshold,
        None => false,
    }
}
