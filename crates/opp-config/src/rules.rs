//! Declarative rule catalog types.
//!
//! A rule is data, not code: which entity types it applies to, which metrics
//! it reads, how its baseline is built, the condition tree that decides a
//! firing, what evidence to carry, and how to phrase recommended actions.
//! These types match the rules.json file layout.

use opp_common::{EntityType, TrendPattern};
use serde::{Deserialize, Serialize};

/// A versioned list of rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCatalog {
    pub schema_version: String,

    #[serde(default)]
    pub catalog_id: Option<String>,

    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

impl RuleCatalog {
    /// Load a catalog from a JSON file.
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

    /// Parse a catalog from a JSON string.
    pub fn parse_json(content: &str) -> Result<Self, crate::validate::ValidationError> {
        serde_json::from_str(content)
            .map_err(|e| crate::validate::ValidationError::ParseError(e.to_string()))
    }

    /// Rules with `enabled = true`.
    pub fn enabled(&self) -> impl Iterator<Item = &RuleSpec> {
        self.rules.iter().filter(|r| r.enabled)
    }

    /// Look up a rule by id.
    pub fn get(&self, id: &str) -> Option<&RuleSpec> {
        self.rules.iter().find(|r| r.id == id)
    }
}

/// One detection rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Dedup key together with the entity id.
    pub category: String,

    /// Consumer-facing opportunity kind (e.g. "content_decay").
    pub opportunity_type: String,

    pub applicable_entity_types: Vec<EntityType>,

    /// Metrics the rule reads. The first one is the primary metric that
    /// drives deviation, trend and scoring.
    pub metrics: Vec<MetricRef>,

    #[serde(default)]
    pub baseline: BaselineSpec,

    pub condition: Condition,

    #[serde(default = "default_evidence")]
    pub evidence: Vec<EvidenceField>,

    pub base_confidence: f64,

    #[serde(default)]
    pub severity: Severity,

    /// Metric whose cohort percentile weights impact (e.g. "sessions").
    #[serde(default)]
    pub traffic_metric: Option<String>,

    /// Action templates. Placeholders: `{entity_id}`, `{entity_type}`,
    /// `{metric}`, `{current}`, `{baseline_mean}`, `{deviation_pct}`,
    /// `{trend}`, `{run_length}`.
    #[serde(default)]
    pub recommended_actions: Vec<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RuleSpec {
    /// Name of the primary metric, if any metric is declared.
    pub fn primary_metric(&self) -> Option<&str> {
        self.metrics.first().map(|m| m.name.as_str())
    }

    /// Whether the rule applies to entities of this type.
    pub fn applies_to(&self, entity_type: EntityType) -> bool {
        self.applicable_entity_types.contains(&entity_type)
    }
}

fn default_true() -> bool {
    true
}

fn default_evidence() -> Vec<EvidenceField> {
    vec![
        EvidenceField::Current,
        EvidenceField::BaselineMean,
        EvidenceField::DeviationPct,
        EvidenceField::Trend,
        EvidenceField::RunLength,
    ]
}

/// A metric read by a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRef {
    pub name: String,

    /// When true (the default) an undefined baseline for this metric makes
    /// the rule decline before its condition is evaluated.
    #[serde(default = "default_true")]
    pub requires_baseline: bool,
}

impl MetricRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires_baseline: true,
        }
    }

    pub fn optional_baseline(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires_baseline: false,
        }
    }
}

/// Baseline window kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    /// The N periods immediately preceding the current one.
    TrailingNPeriods,
    /// The same calendar position in prior years.
    SamePeriodPriorYear,
}

impl WindowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::TrailingNPeriods => "trailing_n_periods",
            WindowKind::SamePeriodPriorYear => "same_period_prior_year",
        }
    }
}

/// How a rule's baselines are computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSpec {
    pub window: WindowKind,

    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Overrides the engine's default minimum sample count.
    #[serde(default)]
    pub min_samples: Option<usize>,
}

fn default_window_size() -> usize {
    3
}

impl Default for BaselineSpec {
    fn default() -> Self {
        Self {
            window: WindowKind::TrailingNPeriods,
            window_size: default_window_size(),
            min_samples: None,
        }
    }
}

/// Rule severity; bounds urgency at scoring time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Floors urgency at the policy's crisis floor.
    Crisis,
    #[default]
    Standard,
    /// Caps urgency at the policy's informational cap.
    Informational,
}

/// Evidence fields extracted per metric into an opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceField {
    Current,
    BaselineMean,
    BaselineStddev,
    BaselineSamples,
    BaselineWindow,
    DeviationPct,
    ZScore,
    Trend,
    RunLength,
    Deltas,
    PeerPercentile,
}

impl EvidenceField {
    pub fn key(&self) -> &'static str {
        match self {
            EvidenceField::Current => "current",
            EvidenceField::BaselineMean => "baseline_mean",
            EvidenceField::BaselineStddev => "baseline_stddev",
            EvidenceField::BaselineSamples => "baseline_samples",
            EvidenceField::BaselineWindow => "baseline_window",
            EvidenceField::DeviationPct => "deviation_pct",
            EvidenceField::ZScore => "z_score",
            EvidenceField::Trend => "trend",
            EvidenceField::RunLength => "run_length",
            EvidenceField::Deltas => "deltas",
            EvidenceField::PeerPercentile => "peer_percentile",
        }
    }
}

/// Condition tree evaluated against current-vs-baseline inputs.
///
/// Leaves name a metric; an absent `metric` means the rule's primary metric.
/// Every leaf evaluates to false when the quantity it needs is undefined
/// (missing baseline, zero mean, zero stddev, unknown percentile).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    All {
        conditions: Vec<Condition>,
    },
    Any {
        conditions: Vec<Condition>,
    },
    Not {
        condition: Box<Condition>,
    },
    /// `(current - mean) / mean <= pct` (use a negative pct for drops).
    DeviationAtMost {
        #[serde(default)]
        metric: Option<String>,
        pct: f64,
    },
    /// `(current - mean) / mean >= pct`.
    DeviationAtLeast {
        #[serde(default)]
        metric: Option<String>,
        pct: f64,
    },
    ZScoreAtLeast {
        #[serde(default)]
        metric: Option<String>,
        z: f64,
    },
    ZScoreAtMost {
        #[serde(default)]
        metric: Option<String>,
        z: f64,
    },
    ValueAtLeast {
        #[serde(default)]
        metric: Option<String>,
        value: f64,
    },
    ValueAtMost {
        #[serde(default)]
        metric: Option<String>,
        value: f64,
    },
    /// Trend label is one of `patterns` and the run is at least `min_run`.
    TrendIn {
        #[serde(default)]
        metric: Option<String>,
        patterns: Vec<TrendPattern>,
        #[serde(default)]
        min_run: u32,
    },
    /// Cohort percentile rank among same-type entities is at least `pct`.
    PercentileAtLeast {
        #[serde(default)]
        metric: Option<String>,
        pct: f64,
    },
    PercentileAtMost {
        #[serde(default)]
        metric: Option<String>,
        pct: f64,
    },
}

impl Condition {
    /// Metric named by this node, if it is a leaf with an explicit metric.
    pub fn metric(&self) -> Option<&str> {
        match self {
            Condition::All { .. } | Condition::Any { .. } | Condition::Not { .. } => None,
            Condition::DeviationAtMost { metric, .. }
            | Condition::DeviationAtLeast { metric, .. }
            | Condition::ZScoreAtLeast { metric, .. }
            | Condition::ZScoreAtMost { metric, .. }
            | Condition::ValueAtLeast { metric, .. }
            | Condition::ValueAtMost { metric, .. }
            | Condition::TrendIn { metric, .. }
            | Condition::PercentileAtLeast { metric, .. }
            | Condition::PercentileAtMost { metric, .. } => metric.as_deref(),
        }
    }

    /// Visit every node depth-first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Condition)) {
        visit(self);
        match self {
            Condition::All { conditions } | Condition::Any { conditions } => {
                for c in conditions {
                    c.walk(visit);
                }
            }
            Condition::Not { condition } => condition.walk(visit),
            _ => {}
        }
    }

    /// Explicit metric names referenced anywhere in the tree.
    pub fn referenced_metrics(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        self.walk(&mut |c| {
            if let Some(m) = c.metric() {
                if !out.iter().any(|x| x == m) {
                    out.push(m.to_string());
                }
            }
        });
        out
    }

    /// Metrics whose cohort percentile is read by the tree (`None` = primary).
    pub fn percentile_metrics(&self) -> Vec<Option<String>> {
        let mut out: Vec<Option<String>> = Vec::new();
        self.walk(&mut |c| {
            if let Condition::PercentileAtLeast { metric, .. }
            | Condition::PercentileAtMost { metric, .. } = c
            {
                if !out.contains(metric) {
                    out.push(metric.clone());
                }
            }
        });
        out
    }
}
