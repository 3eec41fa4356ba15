//! Per-entity metric time series.
//!
//! A [`MetricSeries`] holds the observations of one metric for one entity,
//! in strictly increasing period order. Construction rejects out-of-order,
//! duplicate or overlapping periods, inverted periods and non-finite values; everything downstream
//! (baselines, trends) relies on those invariants.

use chrono::{Datelike, NaiveDate};
use opp_common::{EntityId, EntityType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One metric value for one period. Periods are inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricObservation {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub value: f64,
}

impl MetricObservation {
    pub fn new(period_start: NaiveDate, period_end: NaiveDate, value: f64) -> Self {
        Self {
            period_start,
            period_end,
            value,
        }
    }

    /// Period length in days, inclusive.
    pub fn days(&self) -> i64 {
        (self.period_end - self.period_start).num_days() + 1
    }
}

/// Period granularity, inferred from the length of an observation's period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
    Other,
}

impl Granularity {
    pub fn of(obs: &MetricObservation) -> Self {
        match obs.days() {
            1 => Granularity::Daily,
            7 => Granularity::Weekly,
            28..=31 if obs.period_start.day() == 1 => Granularity::Monthly,
            _ => Granularity::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("malformed series for {entity_id}/{metric}: {reason}")]
    Malformed {
        entity_id: String,
        metric: String,
        reason: String,
    },
}

impl SeriesError {
    fn malformed(entity_id: &EntityId, metric: &str, reason: impl Into<String>) -> Self {
        SeriesError::Malformed {
            entity_id: entity_id.to_string(),
            metric: metric.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<SeriesError> for opp_common::Error {
    fn from(err: SeriesError) -> Self {
        opp_common::Error::MalformedSeries(err.to_string())
    }
}

/// Ordered, validated observations of one metric for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSeries {
    entity_id: EntityId,
    entity_type: EntityType,
    metric: String,
    observations: Vec<MetricObservation>,
}

impl MetricSeries {
    /// Build a series from observations already ordered by period start.
    pub fn new(
        entity_id: EntityId,
        entity_type: EntityType,
        metric: impl Into<String>,
        observations: Vec<MetricObservation>,
    ) -> Result<Self, SeriesError> {
        let metric = metric.into();

        for obs in &observations {
            if !obs.value.is_finite() {
                return Err(SeriesError::malformed(
                    &entity_id,
                    &metric,
                    format!("non-finite value for period {}", obs.period_start),
                ));
            }
            if obs.period_end < obs.period_start {
                return Err(SeriesError::malformed(
                    &entity_id,
                    &metric,
                    format!(
                        "period ends {} before it starts {}",
                        obs.period_end, obs.period_start
                    ),
                ));
            }
        }

        for pair in observations.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.period_start > next.period_start {
                return Err(SeriesError::malformed(
                    &entity_id,
                    &metric,
                    format!(
                        "period {} out of order after {}",
                        next.period_start, prev.period_start
                    ),
                ));
            }
            if prev.period_start == next.period_start {
                return Err(SeriesError::malformed(
                    &entity_id,
                    &metric,
                    format!("duplicate period {}", next.period_start),
                ));
            }
            if prev.period_end >= next.period_start {
                return Err(SeriesError::malformed(
                    &entity_id,
                    &metric,
                    format!(
                        "period {}..{} overlaps {}..{}",
                        prev.period_start, prev.period_end, next.period_start, next.period_end
                    ),
                ));
            }
        }

        Ok(Self {
            entity_id,
            entity_type,
            metric,
            observations,
        })
    }

    /// Convenience constructor for contiguous periods of `days` length
    /// starting at `first_start`.
    pub fn from_values(
        entity_id: EntityId,
        entity_type: EntityType,
        metric: impl Into<String>,
        first_start: NaiveDate,
        days: u32,
        values: &[f64],
    ) -> Result<Self, SeriesError> {
        let len = chrono::Duration::days(i64::from(days.max(1)));
        let observations = values
            .iter()
            .enumerate()
            .map(|(i, &value)| {
                let start = first_start + len * i as i32;
                MetricObservation::new(start, start + len - chrono::Duration::days(1), value)
            })
            .collect();
        Self::new(entity_id, entity_type, metric, observations)
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn observations(&self) -> &[MetricObservation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// The last observation.
    pub fn current(&self) -> Option<&MetricObservation> {
        self.observations.last()
    }

    /// Everything before the current observation.
    pub fn history(&self) -> &[MetricObservation] {
        match self.observations.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }

    /// True when the last observation starts exactly at `period_start`.
    pub fn is_current_at(&self, period_start: NaiveDate) -> bool {
        self.current()
            .is_some_and(|o| o.period_start == period_start)
    }

    pub fn values(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.value).collect()
    }

    /// Granularity of the current observation.
    pub fn granularity(&self) -> Option<Granularity> {
        self.current().map(Granularity::of)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn obs(start: NaiveDate, end: NaiveDate, v: f64) -> MetricObservation {
        MetricObservation::new(start, end, v)
    }

    #[test]
    fn exposes_current_and_history() {
        let series = MetricSeries::new(
            EntityId::from("page_42"),
            EntityType::Page,
            "sessions",
            vec![
                obs(d(2026, 1, 1), d(2026, 1, 31), 1000.0),
                obs(d(2026, 3, 1), d(2026, 3, 31), 900.0),
                obs(d(2026, 4, 1), d(2026, 4, 30), 750.0),
            ],
        )
        .unwrap();
        assert_eq!(series.values(), vec![1000.0, 900.0, 750.0]);
        assert_eq!(series.current().unwrap().value, 750.0);
        assert_eq!(series.history().len(), 2);
        assert!(series.is_current_at(d(2026, 4, 1)));
        assert_eq!(series.granularity(), Some(Granularity::Monthly));
    }

    #[test]
    fn gaps_are_allowed() {
        let series = MetricSeries::new(
            EntityId::from("e"),
            EntityType::Page,
            "m",
            vec![
                obs(d(2026, 1, 1), d(2026, 1, 31), 1.0),
                obs(d(2026, 3, 1), d(2026, 3, 31), 2.0),
            ],
        );
        assert!(series.is_ok());
    }

    #[test]
    fn out_of_order_rejected() {
        let err = MetricSeries::new(
            EntityId::from("e"),
            EntityType::Page,
            "m",
            vec![
                obs(d(2026, 3, 1), d(2026, 3, 31), 1.0),
                obs(d(2026, 1, 1), d(2026, 1, 31), 2.0),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, SeriesError::Malformed { .. }));
        assert!(err.to_string().contains("out of order"));
    }

    #[test]
    fn duplicate_period_rejected() {
        let err = MetricSeries::new(
            EntityId::from("e"),
            EntityType::Page,
            "m",
            vec![
                obs(d(2026, 1, 1), d(2026, 1, 31), 1.0),
                obs(d(2026, 1, 1), d(2026, 1, 31), 2.0),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate period"));
    }

    #[test]
    fn overlap_rejected() {
        let err = MetricSeries::new(
            EntityId::from("e"),
            EntityType::Page,
            "m",
            vec![
                obs(d(2026, 1, 1), d(2026, 1, 10), 1.0),
                obs(d(2026, 1, 5), d(2026, 1, 15), 2.0),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn non_finite_and_inverted_rejected() {
        let nan = MetricSeries::new(
            EntityId::from("e"),
            EntityType::Page,
            "m",
            vec![obs(d(2026, 1, 1), d(2026, 1, 1), f64::NAN)],
        );
        assert!(nan.is_err());
        let inverted = MetricSeries::new(
            EntityId::from("e"),
            EntityType::Page,
            "m",
            vec![obs(d(2026, 1, 5), d(2026, 1, 1), 1.0)],
        );
        assert!(inverted.is_err());
    }

    #[test]
    fn malformed_maps_to_common_error() {
        let err = SeriesError::malformed(&EntityId::from("e"), "m", "bad");
        let common: opp_common::Error = err.into();
        assert_eq!(common.code(), 21);
    }

    #[test]
    fn granularity_inference() {
        assert_eq!(
            Granularity::of(&obs(d(2026, 1, 5), d(2026, 1, 5), 0.0)),
            Granularity::Daily
        );
        assert_eq!(
            Granularity::of(&obs(d(2026, 1, 5), d(2026, 1, 11), 0.0)),
            Granularity::Weekly
        );
        assert_eq!(
            Granularity::of(&obs(d(2026, 2, 1), d(2026, 2, 28), 0.0)),
            Granularity::Monthly
        );
        assert_eq!(
            Granularity::of(&obs(d(2026, 2, 3), d(2026, 3, 2), 0.0)),
            Granularity::Other
        );
    }

    #[test]
    fn from_values_builds_contiguous_periods() {
        let series = MetricSeries::from_values(
            EntityId::from("e"),
            EntityType::Email,
            "open_rate",
            d(2026, 1, 5),
            7,
            &[0.3, 0.28, 0.25],
        )
        .unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.current().unwrap().period_start, d(2026, 1, 19));
        assert_eq!(series.granularity(), Some(Granularity::Weekly));
    }
}
