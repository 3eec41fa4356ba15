//! Opportunity scoring: confidence, impact, urgency and priority.
//!
//! All four are pure functions of a firing, the rule's base confidence and
//! severity, the entity's traffic percentile and the scoring policy. There are
//! no per-rule overrides: a rule shapes its score only through
//! `base_confidence` and `severity`.

use opp_common::TrendPattern;
use opp_config::policy::{ConfidenceParams, ImpactWeights, PriorityThresholds, UrgencyTiers};
use opp_config::rules::{RuleSpec, Severity};
use opp_config::ScoringPolicy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::rule::Firing;

/// Priority tier. Ordered so that `High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub confidence: f64,
    pub impact: f64,
    pub urgency: f64,
    pub priority: Priority,
}

/// `base + run_bonus × min(run, run_cap)`, clamped to `[0, ceiling]`.
pub fn confidence(params: &ConfidenceParams, base_confidence: f64, run_length: u32) -> f64 {
    let run = run_length.min(params.run_cap);
    let raw = base_confidence + params.run_bonus * f64::from(run);
    opp_math::clamp_finite(raw, 0.0, params.ceiling.clamp(0.0, 1.0))
}

/// Weighted blend of saturated deviation and traffic percentile, 0-100.
pub fn impact(weights: &ImpactWeights, deviation_pct: Option<f64>, traffic_percentile: f64) -> f64 {
    let dev = deviation_pct
        .map(|d| opp_math::saturate(d, weights.deviation_saturation))
        .unwrap_or(0.0);
    let traffic = opp_math::clamp_unit(traffic_percentile);
    let raw = 100.0 * (weights.deviation_weight * dev + weights.traffic_weight * traffic);
    opp_math::clamp_finite(raw, 0.0, 100.0)
}

fn tier(tiers: &UrgencyTiers, pattern: TrendPattern) -> f64 {
    match pattern {
        TrendPattern::AcceleratingDecline => tiers.accelerating_decline,
        TrendPattern::Declining => tiers.declining,
        TrendPattern::DeceleratingDecline => tiers.decelerating_decline,
        TrendPattern::AcceleratingImprovement => tiers.accelerating_improvement,
        TrendPattern::DeceleratingImprovement => tiers.decelerating_improvement,
        TrendPattern::Improving => tiers.improving,
        TrendPattern::Stable => tiers.stable,
    }
}

/// Pattern tier plus deviation span, then severity floor or cap, 0-100.
pub fn urgency(
    tiers: &UrgencyTiers,
    pattern: TrendPattern,
    deviation_pct: Option<f64>,
    severity: Severity,
) -> f64 {
    let dev = deviation_pct
        .map(|d| opp_math::saturate(d, tiers.deviation_saturation))
        .unwrap_or(0.0);
    let raw = opp_math::clamp_finite(tier(tiers, pattern) + tiers.deviation_span * dev, 0.0, 100.0);
    match severity {
        Severity::Crisis => raw.max(tiers.crisis_floor.clamp(0.0, 100.0)),
        Severity::Informational => raw.min(tiers.informational_cap.clamp(0.0, 100.0)),
        Severity::Standard => raw,
    }
}

/// Total over all inputs, including NaN (which fails every comparison).
pub fn priority(thresholds: &PriorityThresholds, urgency: f64, impact: f64, confidence: f64) -> Priority {
    if urgency >= thresholds.high_urgency
        || (impact >= thresholds.high_impact && confidence >= thresholds.high_confidence)
    {
        Priority::High
    } else if urgency >= thresholds.medium_urgency || impact >= thresholds.medium_impact {
        Priority::Medium
    } else {
        Priority::Low
    }
}

/// Applies a [`ScoringPolicy`] to firings.
#[derive(Debug, Clone)]
pub struct OpportunityScorer {
    policy: ScoringPolicy,
}

impl OpportunityScorer {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    pub fn score(&self, rule: &RuleSpec, firing: &Firing, traffic_percentile: f64) -> Scores {
        let confidence = confidence(
            &self.policy.confidence,
            rule.base_confidence,
            firing.trend.consecutive_run_length,
        );
        let impact = impact(&self.policy.impact, firing.deviation_pct, traffic_percentile);
        let urgency = urgency(
            &self.policy.urgency,
            firing.trend.pattern,
            firing.deviation_pct,
            rule.severity,
        );
        let priority = priority(&self.policy.priority, urgency, impact, confidence);
        Scores {
            confidence,
            impact,
            urgency,
            priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_42_scores() {
        let policy = ScoringPolicy::default();
        let dev = Some(500.0 / (2650.0 / 3.0) - 1.0);

        let c = confidence(&policy.confidence, 0.6, 3);
        assert!((c - 0.81).abs() < 1e-9);

        let u = urgency(&policy.urgency, TrendPattern::AcceleratingDecline, dev, Severity::Standard);
        assert!((u - 96.04).abs() < 0.05);

        let i = impact(&policy.impact, dev, 0.5);
        assert!((i - 72.08).abs() < 0.05);

        assert_eq!(priority(&policy.priority, u, i, c), Priority::High);
    }

    #[test]
    fn confidence_run_is_capped() {
        let params = ConfidenceParams::default();
        let at_cap = confidence(&params, 0.5, 4);
        assert_eq!(confidence(&params, 0.5, 40), at_cap);
        assert_eq!(confidence(&params, 0.9, 4), 0.95);
        assert_eq!(confidence(&params, -1.0, 0), 0.0);
    }

    #[test]
    fn impact_without_deviation_is_traffic_only() {
        let weights = ImpactWeights::default();
        assert!((impact(&weights, None, 1.0) - 40.0).abs() < 1e-9);
        assert_eq!(impact(&weights, Some(10.0), 1.0), 100.0);
    }

    #[test]
    fn severity_floor_and_cap() {
        let tiers = UrgencyTiers::default();
        let crisis = urgency(&tiers, TrendPattern::Stable, None, Severity::Crisis);
        assert_eq!(crisis, 85.0);
        let info = urgency(
            &tiers,
            TrendPattern::AcceleratingDecline,
            Some(-0.9),
            Severity::Informational,
        );
        assert_eq!(info, 50.0);
    }

    #[test]
    fn decline_outranks_improvement() {
        let tiers = UrgencyTiers::default();
        let down = urgency(&tiers, TrendPattern::AcceleratingDecline, Some(-0.2), Severity::Standard);
        let up = urgency(&tiers, TrendPattern::AcceleratingImprovement, Some(0.2), Severity::Standard);
        assert!(down > up);
    }

    #[test]
    fn priority_boundaries() {
        let t = PriorityThresholds::default();
        assert_eq!(priority(&t, 80.0, 0.0, 0.0), Priority::High);
        assert_eq!(priority(&t, 0.0, 70.0, 0.85), Priority::High);
        assert_eq!(priority(&t, 0.0, 70.0, 0.84), Priority::Medium);
        assert_eq!(priority(&t, 55.0, 0.0, 0.0), Priority::Medium);
        assert_eq!(priority(&t, 54.9, 39.9, 1.0), Priority::Low);
        assert_eq!(priority(&t, f64::NAN, f64::NAN, f64::NAN), Priority::Low);
    }

    #[test]
    fn priority_order_and_serde() {
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"high\"");
    }
}
