//! Trend-pattern labels shared by the classifier, rule conditions and scoring.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Qualitative shape of recent period-over-period change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum TrendPattern {
    Stable,
    Improving,
    Declining,
    AcceleratingImprovement,
    AcceleratingDecline,
    DeceleratingImprovement,
    DeceleratingDecline,
}

impl TrendPattern {
    pub fn all() -> &'static [TrendPattern] {
        &[
            TrendPattern::Stable,
            TrendPattern::Improving,
            TrendPattern::Declining,
            TrendPattern::AcceleratingImprovement,
            TrendPattern::AcceleratingDecline,
            TrendPattern::DeceleratingImprovement,
            TrendPattern::DeceleratingDecline,
        ]
    }

    /// True for any of the three decline labels.
    pub fn is_decline(&self) -> bool {
        matches!(
            self,
            TrendPattern::Declining
                | TrendPattern::AcceleratingDecline
                | TrendPattern::DeceleratingDecline
        )
    }

    /// True for any of the three improvement labels.
    pub fn is_improvement(&self) -> bool {
        matches!(
            self,
            TrendPattern::Improving
                | TrendPattern::AcceleratingImprovement
                | TrendPattern::DeceleratingImprovement
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrendPattern::Stable => "stable",
            TrendPattern::Improving => "improving",
            TrendPattern::Declining => "declining",
            TrendPattern::AcceleratingImprovement => "accelerating_improvement",
            TrendPattern::AcceleratingDecline => "accelerating_decline",
            TrendPattern::DeceleratingImprovement => "decelerating_improvement",
            TrendPattern::DeceleratingDecline => "decelerating_decline",
        }
    }
}

impl fmt::Display for TrendPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decline_and_improvement_are_disjoint() {
        for p in TrendPattern::all() {
            assert!(!(p.is_decline() && p.is_improvement()), "{}", p);
        }
        assert!(!TrendPattern::Stable.is_decline());
        assert!(!TrendPattern::Stable.is_improvement());
    }

    #[test]
    fn serde_matches_display() {
        for p in TrendPattern::all() {
            let json = serde_json::to_string(p).unwrap();
            assert_eq!(json, format!("\"{}\"", p));
        }
    }
}
