//! Scoring presets.
//!
//! - Balanced: the default weights and thresholds
//! - Conservative: fewer, stronger signals reach medium/high priority
//! - Aggressive: surfaces smaller deviations earlier

use crate::policy::ScoringPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Available scoring presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetName {
    Balanced,
    Conservative,
    Aggressive,
}

impl PresetName {
    pub const ALL: &'static [PresetName] = &[
        PresetName::Balanced,
        PresetName::Conservative,
        PresetName::Aggressive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PresetName::Balanced => "balanced",
            PresetName::Conservative => "conservative",
            PresetName::Aggressive => "aggressive",
        }
    }

    /// Parse a preset name, accepting a few aliases.
    pub fn parse(s: &str) -> Option<PresetName> {
        match s.to_lowercase().as_str() {
            "balanced" | "default" => Some(PresetName::Balanced),
            "conservative" | "quiet" | "strict" => Some(PresetName::Conservative),
            "aggressive" | "sensitive" | "eager" => Some(PresetName::Aggressive),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PresetName::Balanced => "Deviation and traffic weighted 60/40, standard thresholds",
            PresetName::Conservative => {
                "Traffic-heavy impact, higher priority thresholds, slower confidence accrual"
            }
            PresetName::Aggressive => {
                "Deviation-heavy impact, lower thresholds, faster saturation"
            }
        }
    }
}

impl fmt::Display for PresetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PresetName {
    type Err = PresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PresetName::parse(s).ok_or_else(|| PresetError::UnknownPreset(s.to_string()))
    }
}

/// Errors related to preset operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresetError {
    UnknownPreset(String),
}

impl fmt::Display for PresetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresetError::UnknownPreset(name) => write!(
                f,
                "Unknown preset '{}'. Available: {}",
                name,
                PresetName::ALL
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

impl std::error::Error for PresetError {}

/// Scoring policy for a preset.
pub fn get_preset(name: PresetName) -> ScoringPolicy {
    match name {
        PresetName::Balanced => ScoringPolicy::default(),
        PresetName::Conservative => conservative_preset(),
        PresetName::Aggressive => aggressive_preset(),
    }
}

fn conservative_preset() -> ScoringPolicy {
    let mut policy = ScoringPolicy {
        policy_id: Some("conservative".to_string()),
        description: Some(PresetName::Conservative.description().to_string()),
        ..ScoringPolicy::default()
    };
    policy.confidence.run_bonus = 0.05;
    policy.confidence.ceiling = 0.9;
    policy.impact.deviation_weight = 0.4;
    policy.impact.traffic_weight = 0.6;
    policy.impact.deviation_saturation = 0.6;
    policy.urgency.deviation_saturation = 0.6;
    policy.priority.high_urgency = 85.0;
    policy.priority.high_impact = 75.0;
    policy.priority.high_confidence = 0.9;
    policy.priority.medium_urgency = 60.0;
    policy.priority.medium_impact = 50.0;
    policy.engine.default_min_samples = 4;
    policy
}

fn aggressive_preset() -> ScoringPolicy {
    let mut policy = ScoringPolicy {
        policy_id: Some("aggressive".to_string()),
        description: Some(PresetName::Aggressive.description().to_string()),
        ..ScoringPolicy::default()
    };
    policy.confidence.run_bonus = 0.08;
    policy.impact.deviation_weight = 0.75;
    policy.impact.traffic_weight = 0.25;
    policy.impact.deviation_saturation = 0.35;
    policy.urgency.deviation_saturation = 0.35;
    policy.priority.high_urgency = 75.0;
    policy.priority.high_impact = 65.0;
    policy.priority.high_confidence = 0.8;
    policy.priority.medium_urgency = 45.0;
    policy.priority.medium_impact = 30.0;
    policy
}

/// Preset summary for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetInfo {
    pub name: String,
    pub description: String,
    pub deviation_weight: f64,
    pub traffic_weight: f64,
    pub high_urgency: f64,
    pub medium_urgency: f64,
}

impl PresetInfo {
    pub fn from_preset(name: PresetName) -> Self {
        let policy = get_preset(name);
        Self {
            name: name.as_str().to_string(),
            description: name.description().to_string(),
            deviation_weight: policy.impact.deviation_weight,
            traffic_weight: policy.impact.traffic_weight,
            high_urgency: policy.priority.high_urgency,
            medium_urgency: policy.priority.medium_urgency,
        }
    }
}

pub fn list_presets() -> Vec<PresetInfo> {
    PresetName::ALL
        .iter()
        .map(|&name| PresetInfo::from_preset(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::validate_policy;

    #[test]
    fn preset_name_parsing() {
        assert_eq!(PresetName::parse("balanced"), Some(PresetName::Balanced));
        assert_eq!(PresetName::parse("DEFAULT"), Some(PresetName::Balanced));
        assert_eq!(PresetName::parse("quiet"), Some(PresetName::Conservative));
        assert_eq!(PresetName::parse("eager"), Some(PresetName::Aggressive));
        assert_eq!(PresetName::parse("nope"), None);
    }

    #[test]
    fn unknown_preset_lists_available() {
        let err = "nope".parse::<PresetName>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("balanced"));
        assert!(msg.contains("aggressive"));
    }

    #[test]
    fn every_preset_validates() {
        for &name in PresetName::ALL {
            let policy = get_preset(name);
            assert!(
                validate_policy(&policy).is_ok(),
                "preset {} failed validation",
                name
            );
        }
    }

    #[test]
    fn aggressive_is_more_sensitive_than_conservative() {
        let a = get_preset(PresetName::Aggressive);
        let c = get_preset(PresetName::Conservative);
        assert!(a.priority.high_urgency < c.priority.high_urgency);
        assert!(a.priority.medium_impact < c.priority.medium_impact);
    }

    #[test]
    fn list_presets_covers_all() {
        assert_eq!(list_presets().len(), PresetName::ALL.len());
    }
}
