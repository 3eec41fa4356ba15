//! Metric sources.
//!
//! The engine reads metrics only through [`MetricSource`]. The shipped
//! implementation, [`MemoryMetricSource`], holds rows loaded from a JSON
//! array or JSONL export.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::NaiveDate;
use opp_common::{Entity, EntityId, EntityType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::skip_kinds;
use crate::series::{MetricObservation, MetricSeries, SeriesError};

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("metric source unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Malformed(#[from] SeriesError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("entity {entity_id} appears as both {first} and {second}")]
    Inconsistent {
        entity_id: String,
        first: EntityType,
        second: EntityType,
    },
}

impl SourceError {
    /// Key used in run report skip counters.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Malformed(_) => skip_kinds::MALFORMED_SERIES,
            _ => skip_kinds::SOURCE_ERROR,
        }
    }
}

impl From<SourceError> for opp_common::Error {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Malformed(e) => e.into(),
            SourceError::Io { source, .. } => opp_common::Error::Io(source),
            other => opp_common::Error::Source(other.to_string()),
        }
    }
}

/// Read-only access to metric history.
pub trait MetricSource: Send + Sync {
    /// Observations of `metric` for `entity` with period start inside `range`.
    fn fetch_series(
        &self,
        entity: &Entity,
        metric: &str,
        range: DateRange,
    ) -> Result<MetricSeries, SourceError>;

    /// Values of `metric` for every entity of `entity_type` whose observation
    /// starts at `period.start`.
    fn fetch_peer_values(
        &self,
        entity_type: EntityType,
        metric: &str,
        period: DateRange,
    ) -> Result<Vec<(EntityId, f64)>, SourceError>;
}

/// One exported row: all metrics of one entity for one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub entity_id: EntityId,
    pub entity_type: EntityType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub metrics: BTreeMap<String, f64>,
}

/// In-memory source over exported rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetricSource {
    rows: Vec<MetricRow>,
    entities: BTreeMap<EntityId, EntityType>,
}

impl MemoryMetricSource {
    pub fn from_rows(rows: Vec<MetricRow>) -> Result<Self, SourceError> {
        let mut entities: BTreeMap<EntityId, EntityType> = BTreeMap::new();
        for row in &rows {
            match entities.get(&row.entity_id) {
                Some(&known) if known != row.entity_type => {
                    return Err(SourceError::Inconsistent {
                        entity_id: row.entity_id.to_string(),
                        first: known,
                        second: row.entity_type,
                    });
                }
                Some(_) => {}
                None => {
                    entities.insert(row.entity_id.clone(), row.entity_type);
                }
            }
        }
        Ok(Self { rows, entities })
    }

    /// Load a JSON array of rows or JSONL (one row per line).
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_rows(parse_rows(&content)?)
    }

    pub fn rows(&self) -> &[MetricRow] {
        &self.rows
    }

    /// Every entity seen in the rows, ordered by id.
    pub fn entities(&self) -> Vec<Entity> {
        self.entities
            .iter()
            .map(|(id, ty)| Entity {
                id: id.clone(),
                entity_type: *ty,
            })
            .collect()
    }

    /// The most recent period in the rows: latest start, and the latest end
    /// among rows with that start.
    pub fn latest_period(&self) -> Option<DateRange> {
        let start = self.rows.iter().map(|r| r.period_start).max()?;
        let end = self
            .rows
            .iter()
            .filter(|r| r.period_start == start)
            .map(|r| r.period_end)
            .max()?;
        Some(DateRange::new(start, end))
    }

    /// Distinct metric names across all rows.
    pub fn metric_names(&self) -> BTreeSet<&str> {
        self.rows
            .iter()
            .flat_map(|r| r.metrics.keys().map(String::as_str))
            .collect()
    }
}

/// Parse rows from either a JSON array or JSONL.
pub fn parse_rows(content: &str) -> Result<Vec<MetricRow>, SourceError> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| SourceError::Parse {
            line: e.line(),
            message: e.to_string(),
        });
    }

    let mut rows = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(line).map_err(|e| SourceError::Parse {
            line: idx + 1,
            message: e.to_string(),
        })?;
        rows.push(row);
    }
    Ok(rows)
}

impl MetricSource for MemoryMetricSource {
    fn fetch_series(
        &self,
        entity: &Entity,
        metric: &str,
        range: DateRange,
    ) -> Result<MetricSeries, SourceError> {
        // Input files need not be ordered; the series itself must be.
        let mut observations: Vec<MetricObservation> = self
            .rows
            .iter()
            .filter(|r| r.entity_id == entity.id && range.contains(r.period_start))
            .filter_map(|r| {
                r.metrics
                    .get(metric)
                    .map(|v| MetricObservation::new(r.period_start, r.period_end, *v))
            })
            .collect();
        observations.sort_by_key(|o| o.period_start);
        Ok(MetricSeries::new(
            entity.id.clone(),
            entity.entity_type,
            metric,
            observations,
        )?)
    }

    fn fetch_peer_values(
        &self,
        entity_type: EntityType,
        metric: &str,
        period: DateRange,
    ) -> Result<Vec<(EntityId, f64)>, SourceError> {
        Ok(self
            .rows
            .iter()
            .filter(|r| r.entity_type == entity_type && r.period_start == period.start)
            .filter_map(|r| r.metrics.get(metric).map(|v| (r.entity_id.clone(), *v)))
            .collect())
    }
}
