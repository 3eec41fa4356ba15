//! Baselines and peer percentile ranks.
//!
//! Two window kinds:
//! - trailing: the N observations immediately before the current one
//! - prior-year: observations at the same calendar position in earlier years
//!   (month for monthly series, ISO week for weekly, month+day for daily)
//!
//! Too few qualifying samples yields [`UndefinedBaseline`] rather than a
//! number computed from thin data. Rules that need the baseline then decline.

use std::collections::{BTreeMap, HashMap};

use chrono::Datelike;
use opp_common::EntityId;
use opp_config::rules::{BaselineSpec, WindowKind};
use opp_config::EngineSettings;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::series::{Granularity, MetricObservation, MetricSeries};

/// Mean and spread of a metric over a reference window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub window: WindowKind,
    pub mean: f64,
    /// Sample standard deviation (n-1 denominator).
    pub stddev: f64,
    pub sample_count: usize,
}

/// Why a baseline could not be computed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("undefined {} baseline: {reason}", .window.as_str())]
pub struct UndefinedBaseline {
    pub window: WindowKind,
    pub reason: String,
}

impl UndefinedBaseline {
    fn new(window: WindowKind, reason: impl Into<String>) -> Self {
        Self {
            window,
            reason: reason.into(),
        }
    }
}

impl From<UndefinedBaseline> for opp_common::Error {
    fn from(err: UndefinedBaseline) -> Self {
        opp_common::Error::UndefinedBaseline(err.reason)
    }
}

/// Resolved baseline parameters for one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaselineRequest {
    pub window: WindowKind,
    /// Periods for trailing windows, years for prior-year windows.
    pub window_size: usize,
    pub min_samples: usize,
    pub min_prior_years: usize,
}

impl BaselineRequest {
    pub fn trailing(window_size: usize, min_samples: usize) -> Self {
        Self {
            window: WindowKind::TrailingNPeriods,
            window_size,
            min_samples,
            min_prior_years: 2,
        }
    }

    pub fn prior_year(years: usize, min_samples: usize) -> Self {
        Self {
            window: WindowKind::SamePeriodPriorYear,
            window_size: years,
            min_samples,
            min_prior_years: 2,
        }
    }

    /// Rule spec values, with engine defaults for anything unset.
    pub fn from_spec(spec: &BaselineSpec, settings: &EngineSettings) -> Self {
        Self {
            window: spec.window,
            window_size: spec.window_size,
            min_samples: spec.min_samples.unwrap_or(settings.default_min_samples),
            min_prior_years: settings.min_prior_years,
        }
    }
}

/// Compute the baseline for the series' current observation.
pub fn compute(
    series: &MetricSeries,
    request: &BaselineRequest,
) -> Result<Baseline, UndefinedBaseline> {
    let samples = match request.window {
        WindowKind::TrailingNPeriods => trailing_samples(series, request)?,
        WindowKind::SamePeriodPriorYear => prior_year_samples(series, request)?,
    };

    let summary = opp_math::summarize(&samples)
        .ok_or_else(|| UndefinedBaseline::new(request.window, "no usable samples"))?;

    Ok(Baseline {
        window: request.window,
        mean: summary.mean,
        stddev: summary.stddev,
        sample_count: summary.n,
    })
}

fn trailing_samples(
    series: &MetricSeries,
    request: &BaselineRequest,
) -> Result<Vec<f64>, UndefinedBaseline> {
    let window = WindowKind::TrailingNPeriods;
    if series.current().is_none() {
        return Err(UndefinedBaseline::new(window, "empty series"));
    }
    if request.window_size < request.min_samples {
        return Err(UndefinedBaseline::new(
            window,
            format!(
                "window of {} periods cannot reach {} samples",
                request.window_size, request.min_samples
            ),
        ));
    }

    let history = series.history();
    let take = request.window_size.min(history.len());
    let samples: Vec<f64> = history[history.len() - take..]
        .iter()
        .map(|o| o.value)
        .collect();

    if samples.len() < request.min_samples {
        return Err(UndefinedBaseline::new(
            window,
            format!(
                "{} prior periods, need {}",
                samples.len(),
                request.min_samples
            ),
        ));
    }
    Ok(samples)
}

/// Calendar key identifying "the same period" across years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CalendarKey {
    Month(u32),
    IsoWeek(u32),
    MonthDay(u32, u32),
}

fn calendar_key(obs: &MetricObservation, granularity: Granularity) -> Option<(i32, CalendarKey)> {
    let start = obs.period_start;
    match granularity {
        Granularity::Monthly => Some((start.year(), CalendarKey::Month(start.month()))),
        Granularity::Weekly => {
            let week = start.iso_week();
            Some((week.year(), CalendarKey::IsoWeek(week.week())))
        }
        Granularity::Daily => Some((
            start.year(),
            CalendarKey::MonthDay(start.month(), start.day()),
        )),
        Granularity::Other => None,
    }
}

fn prior_year_samples(
    series: &MetricSeries,
    request: &BaselineRequest,
) -> Result<Vec<f64>, UndefinedBaseline> {
    let window = WindowKind::SamePeriodPriorYear;
    let current = series
        .current()
        .ok_or_else(|| UndefinedBaseline::new(window, "empty series"))?;
    let granularity = Granularity::of(current);
    let (current_year, key) = calendar_key(current, granularity).ok_or_else(|| {
        UndefinedBaseline::new(
            window,
            "period length is not daily, weekly or monthly",
        )
    })?;

    // One value per prior year; the latest observation wins within a year.
    let mut by_year: BTreeMap<i32, f64> = BTreeMap::new();
    for obs in series.history() {
        if Granularity::of(obs) != granularity {
            continue;
        }
        if let Some((year, k)) = calendar_key(obs, granularity) {
            if k == key && year < current_year {
                by_year.insert(year, obs.value);
            }
        }
    }

    let samples: Vec<f64> = by_year
        .values()
        .rev()
        .take(request.window_size)
        .copied()
        .collect();

    let required = request
        .min_prior_years
        .max(request.min_samples.min(request.window_size));
    if samples.len() < required {
        return Err(UndefinedBaseline::new(
            window,
            format!("{} prior years, need {}", samples.len(), required),
        ));
    }
    Ok(samples)
}

/// Mid-rank percentile of each entity among `peers`, in `[0, 1]`.
///
/// `peers` is a single cohort (one entity type, one metric, one period).
/// Non-finite values are ignored. A cohort of one ranks 0.5.
pub fn percentile_ranks(peers: &[(EntityId, f64)]) -> HashMap<EntityId, f64> {
    let mut sorted: Vec<f64> = peers
        .iter()
        .map(|(_, v)| *v)
        .filter(|v| v.is_finite())
        .collect();
    sorted.sort_by(f64::total_cmp);

    peers
        .iter()
        .filter_map(|(id, v)| {
            opp_math::percentile_rank_sorted(*v, &sorted).map(|r| (id.clone(), r))
        })
        .collect()
}
