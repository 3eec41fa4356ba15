//! Scoring policy and engine settings.
//!
//! These types match the policy.json file layout. Every field has a default so
//! a partial file only overrides what it names.

use serde::{Deserialize, Serialize};

/// Complete scoring policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    pub schema_version: String,

    #[serde(default)]
    pub policy_id: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub confidence: ConfidenceParams,

    #[serde(default)]
    pub impact: ImpactWeights,

    #[serde(default)]
    pub urgency: UrgencyTiers,

    #[serde(default)]
    pub priority: PriorityThresholds,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub notes: Option<String>,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            policy_id: Some("balanced".to_string()),
            description: Some("Balanced weighting of deviation and traffic".to_string()),
            confidence: ConfidenceParams::default(),
            impact: ImpactWeights::default(),
            urgency: UrgencyTiers::default(),
            priority: PriorityThresholds::default(),
            engine: EngineSettings::default(),
            notes: None,
        }
    }
}

impl ScoringPolicy {
    /// Load a policy from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::validate::ValidationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::validate::ValidationError::IoError(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::parse_json(&content)
    }

    /// Parse a policy from a JSON string.
    pub fn parse_json(content: &str) -> Result<Self, crate::validate::ValidationError> {
        serde_json::from_str(content)
            .map_err(|e| crate::validate::ValidationError::ParseError(e.to_string()))
    }
}

/// Confidence accrual from consecutive same-direction periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceParams {
    /// Added per consecutive period of the same pattern.
    pub run_bonus: f64,
    /// Runs longer than this earn no further bonus.
    pub run_cap: u32,
    /// Confidence never exceeds this.
    pub ceiling: f64,
}

impl Default for ConfidenceParams {
    fn default() -> Self {
        Self {
            run_bonus: 0.07,
            run_cap: 4,
            ceiling: 0.95,
        }
    }
}

/// Weighting between deviation magnitude and entity traffic for impact.
///
/// `impact = 100 × (deviation_weight × sat(|deviation|) + traffic_weight × traffic_percentile)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactWeights {
    pub deviation_weight: f64,
    pub traffic_weight: f64,
    /// |deviation| at which the deviation term saturates (0.5 = 50%).
    pub deviation_saturation: f64,
}

impl Default for ImpactWeights {
    fn default() -> Self {
        Self {
            deviation_weight: 0.6,
            traffic_weight: 0.4,
            deviation_saturation: 0.5,
        }
    }
}

/// Base urgency per trend pattern plus a deviation-driven span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UrgencyTiers {
    pub accelerating_decline: f64,
    pub declining: f64,
    pub decelerating_decline: f64,
    pub accelerating_improvement: f64,
    pub decelerating_improvement: f64,
    pub improving: f64,
    pub stable: f64,
    /// Points added at full deviation saturation.
    pub deviation_span: f64,
    pub deviation_saturation: f64,
    /// Minimum urgency for crisis-severity rules.
    pub crisis_floor: f64,
    /// Maximum urgency for informational-severity rules.
    pub informational_cap: f64,
}

impl Default for UrgencyTiers {
    fn default() -> Self {
        Self {
            accelerating_decline: 70.0,
            declining: 50.0,
            decelerating_decline: 40.0,
            accelerating_improvement: 20.0,
            decelerating_improvement: 15.0,
            improving: 10.0,
            stable: 15.0,
            deviation_span: 30.0,
            deviation_saturation: 0.5,
            crisis_floor: 85.0,
            informational_cap: 50.0,
        }
    }
}

/// Priority tier boundaries.
///
/// high: `urgency ≥ high_urgency OR (impact ≥ high_impact AND confidence ≥ high_confidence)`;
/// medium: `urgency ≥ medium_urgency OR impact ≥ medium_impact`; otherwise low.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityThresholds {
    pub high_urgency: f64,
    pub high_impact: f64,
    pub high_confidence: f64,
    pub medium_urgency: f64,
    pub medium_impact: f64,
}

impl Default for PriorityThresholds {
    fn default() -> Self {
        Self {
            high_urgency: 80.0,
            high_impact: 70.0,
            high_confidence: 0.85,
            medium_urgency: 55.0,
            medium_impact: 40.0,
        }
    }
}

/// Engine execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Upper bound on worker threads per batch.
    pub max_workers: usize,
    /// Entities per batch; cancellation is checked between batches.
    pub batch_size: usize,
    /// Observations considered by the trend classifier.
    pub lookback: usize,
    /// Minimum baseline samples when a rule does not set its own.
    pub default_min_samples: usize,
    /// Minimum distinct prior years for same-period baselines.
    pub min_prior_years: usize,
    /// How far back series are fetched, in days before the period start.
    pub history_days: i64,
    /// Traffic percentile assumed when an entity has no traffic data.
    pub default_traffic_percentile: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            batch_size: 256,
            lookback: 4,
            default_min_samples: 3,
            min_prior_years: 2,
            history_days: 800,
            default_traffic_percentile: 0.5,
        }
    }
}
