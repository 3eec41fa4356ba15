//! Trend shape over the last few periods.

use opp_common::TrendPattern;
use serde::{Deserialize, Serialize};

use crate::series::MetricSeries;

/// Trend label, streak length and the deltas it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub pattern: TrendPattern,
    pub consecutive_run_length: u32,
    /// Period-over-period fractional changes, most recent first.
    pub deltas: Vec<f64>,
}

impl Trend {
    pub fn stable() -> Self {
        Self {
            pattern: TrendPattern::Stable,
            consecutive_run_length: 0,
            deltas: Vec::new(),
        }
    }
}

impl Default for Trend {
    fn default() -> Self {
        Self::stable()
    }
}

pub fn classify(series: &MetricSeries, lookback: usize) -> Trend {
    classify_values(&series.values(), lookback)
}

/// Classify the tail of `values` (oldest first).
///
/// Needs at least `lookback` values; shorter input is `Stable` with run 0.
/// A delta from a near-zero previous value counts as flat and breaks a streak.
pub fn classify_values(values: &[f64], lookback: usize) -> Trend {
    if lookback < 2 || values.len() < lookback {
        return Trend::stable();
    }

    let window = &values[values.len() - lookback..];
    let deltas: Vec<f64> = window
        .windows(2)
        .rev()
        .map(|w| opp_math::pct_change(w[0], w[1]).unwrap_or(0.0))
        .collect();

    let lead = opp_math::sign_with_tolerance(deltas[0], 0.0);
    if lead == 0 {
        return Trend {
            pattern: TrendPattern::Stable,
            consecutive_run_length: 0,
            deltas,
        };
    }

    let run = deltas
        .iter()
        .take_while(|d| opp_math::sign_with_tolerance(**d, 0.0) == lead)
        .count()
        .min(lookback);

    let declining = lead < 0;
    let pattern = if run >= 3 {
        let (a0, a1, a2) = (deltas[0].abs(), deltas[1].abs(), deltas[2].abs());
        if a0 > a1 && a1 > a2 {
            if declining {
                TrendPattern::AcceleratingDecline
            } else {
                TrendPattern::AcceleratingImprovement
            }
        } else if a0 < a1 && a1 < a2 {
            if declining {
                TrendPattern::DeceleratingDecline
            } else {
                TrendPattern::DeceleratingImprovement
            }
        } else if declining {
            TrendPattern::Declining
        } else {
            TrendPattern::Improving
        }
    } else if run == 2 {
        if declining {
            TrendPattern::Declining
        } else {
            TrendPattern::Improving
        }
    } else {
        TrendPattern::Stable
    };

    Trend {
        pattern,
        consecutive_run_length: run as u32,
        deltas,
    }
}
