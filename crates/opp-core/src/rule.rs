//! Rule evaluation.
//!
//! A [`Rule`] pairs an immutable [`RuleSpec`] with a predicate. Declarative
//! rules use the [`RuleSpec`]'s [`Condition`] tree; native rules supply any closure
//! implementing [`RulePredicate`]. [`evaluate`] applies the required-baseline
//! guard, runs the predicate and, on a firing, extracts deviation and
//! evidence for the scorer.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use opp_common::{EntityId, RuleId};
use opp_config::rules::{Condition, EvidenceField, RuleSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::baseline::{self, Baseline, BaselineRequest, UndefinedBaseline};
use crate::series::MetricSeries;
use crate::trend::{self, Trend};

/// Errors raised by a predicate. Isolated to one (entity, rule) pair.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("metric '{metric}' is not available to the rule")]
    MissingMetric { metric: String },

    #[error("non-finite {quantity} for metric '{metric}'")]
    NonFiniteInput { metric: String, quantity: &'static str },

    #[error("{0}")]
    Predicate(String),
}

impl RuleError {
    pub fn into_common(self, rule_id: &RuleId, entity_id: &EntityId) -> opp_common::Error {
        opp_common::Error::RuleEvaluation {
            rule_id: rule_id.to_string(),
            entity_id: entity_id.to_string(),
            message: self.to_string(),
        }
    }
}

/// Everything a rule can see about one metric of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricView {
    pub name: String,
    /// Value for the detection period, `None` when the series has no
    /// observation starting at the period start.
    pub current: Option<f64>,
    pub baseline: Result<Baseline, UndefinedBaseline>,
    pub trend: Trend,
    /// Cohort percentile rank, when a cohort was computed for this metric.
    pub peer_percentile: Option<f64>,
}

impl MetricView {
    /// Derive current value, baseline and trend from a series.
    pub fn from_series(
        series: &MetricSeries,
        period_start: NaiveDate,
        request: &BaselineRequest,
        lookback: usize,
    ) -> Self {
        if !series.is_current_at(period_start) {
            return Self {
                name: series.metric().to_string(),
                current: None,
                baseline: Err(UndefinedBaseline {
                    window: request.window,
                    reason: format!("no observation starting {}", period_start),
                }),
                trend: Trend::stable(),
                peer_percentile: None,
            };
        }

        Self {
            name: series.metric().to_string(),
            current: series.current().map(|o| o.value),
            baseline: baseline::compute(series, request),
            trend: trend::classify(series, lookback),
            peer_percentile: None,
        }
    }

    /// A view with a current value and nothing else.
    pub fn current_only(name: impl Into<String>, current: f64) -> Self {
        Self {
            name: name.into(),
            current: Some(current),
            baseline: Err(UndefinedBaseline {
                window: opp_config::WindowKind::TrailingNPeriods,
                reason: "not computed".to_string(),
            }),
            trend: Trend::stable(),
            peer_percentile: None,
        }
    }

    pub fn with_baseline(mut self, baseline: Baseline) -> Self {
        self.baseline = Ok(baseline);
        self
    }

    pub fn with_trend(mut self, trend: Trend) -> Self {
        self.trend = trend;
        self
    }

    pub fn with_percentile(mut self, percentile: f64) -> Self {
        self.peer_percentile = Some(percentile);
        self
    }

    fn checked_current(&self) -> Result<Option<f64>, RuleError> {
        match self.current {
            Some(v) if !v.is_finite() => Err(RuleError::NonFiniteInput {
                metric: self.name.clone(),
                quantity: "current value",
            }),
            other => Ok(other),
        }
    }

    fn checked_baseline(&self) -> Result<Option<&Baseline>, RuleError> {
        match &self.baseline {
            Ok(b) if !b.mean.is_finite() || !b.stddev.is_finite() => {
                Err(RuleError::NonFiniteInput {
                    metric: self.name.clone(),
                    quantity: "baseline",
                })
            }
            Ok(b) => Ok(Some(b)),
            Err(_) => Ok(None),
        }
    }

    /// `(current - mean) / mean`, absent when either side is undefined or
    /// the mean is ~0. Signed by the mean: against a negative baseline a
    /// more negative current reads as a positive deviation.
    pub fn deviation_pct(&self) -> Option<f64> {
        let current = self.current?;
        let baseline = self.baseline.as_ref().ok()?;
        deviation_from(baseline.mean, current)
    }

    pub fn z_score(&self) -> Option<f64> {
        let current = self.current?;
        let baseline = self.baseline.as_ref().ok()?;
        opp_math::z_score(current, baseline.mean, baseline.stddev)
    }
}

/// Per-metric views for one entity, keyed by metric name.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationInputs {
    pub primary: String,
    pub metrics: BTreeMap<String, MetricView>,
}

impl EvaluationInputs {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, view: MetricView) -> Self {
        self.metrics.insert(view.name.clone(), view);
        self
    }

    /// View for `metric`, or the primary metric when `None`.
    pub fn view(&self, metric: Option<&str>) -> Result<&MetricView, RuleError> {
        let name = metric.unwrap_or(&self.primary);
        self.metrics.get(name).ok_or_else(|| RuleError::MissingMetric {
            metric: name.to_string(),
        })
    }
}

/// A pure boolean function over evaluation inputs.
pub trait RulePredicate: Send + Sync {
    fn evaluate(&self, inputs: &EvaluationInputs) -> Result<bool, RuleError>;
}

impl<F> RulePredicate for F
where
    F: Fn(&EvaluationInputs) -> Result<bool, RuleError> + Send + Sync,
{
    fn evaluate(&self, inputs: &EvaluationInputs) -> Result<bool, RuleError> {
        self(inputs)
    }
}

impl RulePredicate for Condition {
    fn evaluate(&self, inputs: &EvaluationInputs) -> Result<bool, RuleError> {
        match self {
            Condition::All { conditions } => {
                for c in conditions {
                    if !c.evaluate(inputs)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Any { conditions } => {
                for c in conditions {
                    if c.evaluate(inputs)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not { condition } => Ok(!condition.evaluate(inputs)?),
            Condition::DeviationAtMost { metric, pct } => {
                Ok(deviation(inputs, metric)?.is_some_and(|d| d <= *pct))
            }
            Condition::DeviationAtLeast { metric, pct } => {
                Ok(deviation(inputs, metric)?.is_some_and(|d| d >= *pct))
            }
            Condition::ZScoreAtLeast { metric, z } => {
                Ok(z_score(inputs, metric)?.is_some_and(|s| s >= *z))
            }
            Condition::ZScoreAtMost { metric, z } => {
                Ok(z_score(inputs, metric)?.is_some_and(|s| s <= *z))
            }
            Condition::ValueAtLeast { metric, value } => {
                let view = inputs.view(metric.as_deref())?;
                Ok(view.checked_current()?.is_some_and(|v| v >= *value))
            }
            Condition::ValueAtMost { metric, value } => {
                let view = inputs.view(metric.as_deref())?;
                Ok(view.checked_current()?.is_some_and(|v| v <= *value))
            }
            Condition::TrendIn {
                metric,
                patterns,
                min_run,
            } => {
                let view = inputs.view(metric.as_deref())?;
                Ok(patterns.contains(&view.trend.pattern)
                    && view.trend.consecutive_run_length >= *min_run)
            }
            Condition::PercentileAtLeast { metric, pct } => {
                let view = inputs.view(metric.as_deref())?;
                Ok(view.peer_percentile.is_some_and(|p| p >= *pct))
            }
            Condition::PercentileAtMost { metric, pct } => {
                let view = inputs.view(metric.as_deref())?;
                Ok(view.peer_percentile.is_some_and(|p| p <= *pct))
            }
        }
    }
}

fn deviation(inputs: &EvaluationInputs, metric: &Option<String>) -> Result<Option<f64>, RuleError> {
    let view = inputs.view(metric.as_deref())?;
    let (Some(current), Some(baseline)) = (view.checked_current()?, view.checked_baseline()?)
    else {
        return Ok(None);
    };
    Ok(deviation_from(baseline.mean, current))
}

fn deviation_from(mean: f64, current: f64) -> Option<f64> {
    opp_math::guarded_div(current - mean, mean)
}

fn z_score(inputs: &EvaluationInputs, metric: &Option<String>) -> Result<Option<f64>, RuleError> {
    let view = inputs.view(metric.as_deref())?;
    let (Some(current), Some(baseline)) = (view.checked_current()?, view.checked_baseline()?)
    else {
        return Ok(None);
    };
    Ok(opp_math::z_score(current, baseline.mean, baseline.stddev))
}

/// A rule: immutable spec plus predicate.
#[derive(Clone)]
pub struct Rule {
    spec: Arc<RuleSpec>,
    id: RuleId,
    predicate: Arc<dyn RulePredicate>,
}

impl Rule {
    /// Declarative rule driven by its [`RuleSpec`] condition tree.
    pub fn from_spec(spec: RuleSpec) -> Self {
        let predicate: Arc<dyn RulePredicate> = Arc::new(spec.condition.clone());
        Self {
            id: RuleId::new(spec.id.clone()),
            spec: Arc::new(spec),
            predicate,
        }
    }

    /// Rule with a native predicate; the `RuleSpec` condition is ignored.
    pub fn with_predicate(spec: RuleSpec, predicate: impl RulePredicate + 'static) -> Self {
        Self {
            id: RuleId::new(spec.id.clone()),
            spec: Arc::new(spec),
            predicate: Arc::new(predicate),
        }
    }

    pub fn from_catalog(catalog: &opp_config::RuleCatalog) -> Vec<Rule> {
        catalog.enabled().cloned().map(Rule::from_spec).collect()
    }

    pub fn id(&self) -> &RuleId {
        &self.id
    }

    pub fn spec(&self) -> &RuleSpec {
        &self.spec
    }

    /// Metric names this rule needs series for.
    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.spec.metrics.iter().map(|m| m.name.as_str())
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Why a rule did not fire.
#[derive(Debug, Clone, PartialEq)]
pub enum DeclineReason {
    UndefinedBaseline { metric: String, reason: String },
    NoCurrentData { metric: String },
    ConditionNotMet,
}

impl DeclineReason {
    /// Stable key used in run report counters.
    pub fn kind(&self) -> &'static str {
        match self {
            DeclineReason::UndefinedBaseline { .. } => "undefined_baseline",
            DeclineReason::NoCurrentData { .. } => "no_current_data",
            DeclineReason::ConditionNotMet => "condition_not_met",
        }
    }
}

impl fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclineReason::UndefinedBaseline { metric, reason } => {
                write!(f, "baseline for {} undefined: {}", metric, reason)
            }
            DeclineReason::NoCurrentData { metric } => {
                write!(f, "no current value for {}", metric)
            }
            DeclineReason::ConditionNotMet => write!(f, "condition not met"),
        }
    }
}

/// A rule firing for one entity: primary-metric figures plus evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Firing {
    pub rule_id: RuleId,
    pub metric: String,
    pub current: f64,
    pub baseline_mean: Option<f64>,
    pub deviation_pct: Option<f64>,
    pub z_score: Option<f64>,
    pub trend: Trend,
    /// `"<metric>.<field>"` → value; undefined quantities are `null`.
    pub evidence: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Firing(Firing),
    NoFiring(DeclineReason),
}

impl Evaluation {
    pub fn is_firing(&self) -> bool {
        matches!(self, Evaluation::Firing(_))
    }
}

/// Evaluate one rule against one entity's inputs.
pub fn evaluate(rule: &Rule, inputs: &EvaluationInputs) -> Result<Evaluation, RuleError> {
    let spec = rule.spec();
    let primary = inputs.view(None)?;

    let Some(current) = primary.checked_current()? else {
        return Ok(Evaluation::NoFiring(DeclineReason::NoCurrentData {
            metric: primary.name.clone(),
        }));
    };

    for metric_ref in spec.metrics.iter().filter(|m| m.requires_baseline) {
        let view = inputs.view(Some(&metric_ref.name))?;
        if let Err(undefined) = &view.baseline {
            return Ok(Evaluation::NoFiring(DeclineReason::UndefinedBaseline {
                metric: metric_ref.name.clone(),
                reason: undefined.reason.clone(),
            }));
        }
    }

    if !rule.predicate.evaluate(inputs)? {
        return Ok(Evaluation::NoFiring(DeclineReason::ConditionNotMet));
    }

    let mut evidence = BTreeMap::new();
    for metric_ref in &spec.metrics {
        if let Some(view) = inputs.metrics.get(&metric_ref.name) {
            for field in &spec.evidence {
                evidence.insert(
                    format!("{}.{}", metric_ref.name, field.key()),
                    extract(view, *field),
                );
            }
        }
    }

    Ok(Evaluation::Firing(Firing {
        rule_id: rule.id().clone(),
        metric: primary.name.clone(),
        current,
        baseline_mean: primary.baseline.as_ref().ok().map(|b| b.mean),
        deviation_pct: primary.deviation_pct(),
        z_score: primary.z_score(),
        trend: primary.trend.clone(),
        evidence,
    }))
}

fn extract(view: &MetricView, field: EvidenceField) -> Value {
    let baseline = view.baseline.as_ref().ok();
    let num = |v: Option<f64>| v.map_or(Value::Null, |x| serde_json::json!(x));
    match field {
        EvidenceField::Current => num(view.current),
        EvidenceField::BaselineMean => num(baseline.map(|b| b.mean)),
        EvidenceField::BaselineStddev => num(baseline.map(|b| b.stddev)),
        EvidenceField::BaselineSamples => {
            baseline.map_or(Value::Null, |b| serde_json::json!(b.sample_count))
        }
        EvidenceField::BaselineWindow => {
            baseline.map_or(Value::Null, |b| serde_json::json!(b.window.as_str()))
        }
        EvidenceField::DeviationPct => num(view.deviation_pct()),
        EvidenceField::ZScore => num(view.z_score()),
        EvidenceField::Trend => serde_json::json!(view.trend.pattern.as_str()),
        EvidenceField::RunLength => serde_json::json!(view.trend.consecutive_run_length),
        EvidenceField::Deltas => serde_json::json!(view.trend.deltas),
        EvidenceField::PeerPercentile => num(view.peer_percentile),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opp_common::{EntityType, TrendPattern};
    use opp_config::rules::{BaselineSpec, MetricRef, Severity};
    use opp_config::WindowKind;

    fn spec(condition: Condition, metrics: Vec<MetricRef>) -> RuleSpec {
        RuleSpec {
            id: "page_traffic_decay".to_string(),
            title: "Traffic decay".to_string(),
            description: None,
            category: "content_performance".to_string(),
            opportunity_type: "content_refresh".to_string(),
            applicable_entity_types: vec![EntityType::Page],
            metrics,
            baseline: BaselineSpec::default(),
            condition,
            evidence: vec![
                EvidenceField::Current,
                EvidenceField::BaselineMean,
                EvidenceField::DeviationPct,
                EvidenceField::Trend,
            ],
            base_confidence: 0.6,
            severity: Severity::Standard,
            traffic_metric: None,
            recommended_actions: vec![],
            enabled: true,
        }
    }

    fn baseline(mean: f64, stddev: f64) -> Baseline {
        Baseline {
            window: WindowKind::TrailingNPeriods,
            mean,
            stddev,
            sample_count: 3,
        }
    }

    fn decay_condition() -> Condition {
        Condition::All {
            conditions: vec![
                Condition::DeviationAtMost {
                    metric: None,
                    pct: -0.2,
                },
                Condition::TrendIn {
                    metric: None,
                    patterns: vec![TrendPattern::AcceleratingDecline, TrendPattern::Declining],
                    min_run: 2,
                },
            ],
        }
    }

    fn page_42() -> EvaluationInputs {
        let trend = trend::classify_values(&[1000.0, 900.0, 750.0, 500.0], 4);
        EvaluationInputs::new("sessions").with_metric(
            MetricView::current_only("sessions", 500.0)
                .with_baseline(baseline(883.333, 125.83))
                .with_trend(trend),
        )
    }

    #[test]
    fn fires_with_deviation_and_evidence() {
        let rule = Rule::from_spec(spec(decay_condition(), vec![MetricRef::new("sessions")]));
        let Evaluation::Firing(firing) = evaluate(&rule, &page_42()).unwrap() else {
            panic!("expected firing");
        };
        let dev = firing.deviation_pct.unwrap();
        assert!((dev + 0.434).abs() < 0.001);
        assert_eq!(firing.trend.pattern, TrendPattern::AcceleratingDecline);
        assert_eq!(firing.evidence["sessions.trend"], "accelerating_decline");
        assert_eq!(firing.evidence["sessions.current"], 500.0);
        assert!(firing.evidence.contains_key("sessions.deviation_pct"));
    }

    #[test]
    fn deviation_divides_by_signed_mean() {
        let view =
            MetricView::current_only("net_revenue", -150.0).with_baseline(baseline(-100.0, 10.0));
        assert_eq!(view.deviation_pct(), Some(0.5));

        let rule = Rule::from_spec(spec(
            Condition::DeviationAtLeast {
                metric: None,
                pct: 0.4,
            },
            vec![MetricRef::new("net_revenue")],
        ));
        let inputs = EvaluationInputs::new("net_revenue").with_metric(view);
        let Evaluation::Firing(firing) = evaluate(&rule, &inputs).unwrap() else {
            panic!("expected firing");
        };
        assert_eq!(firing.deviation_pct, Some(0.5));
        assert_eq!(firing.evidence["net_revenue.deviation_pct"], 0.5);
    }

    #[test]
    fn undefined_required_baseline_declines_before_predicate() {
        let rule = Rule::with_predicate(
            spec(decay_condition(), vec![MetricRef::new("sessions")]),
            |_: &EvaluationInputs| -> Result<bool, RuleError> { panic!("must not run") },
        );
        let inputs = EvaluationInputs::new("sessions")
            .with_metric(MetricView::current_only("sessions", 500.0));
        let eval = evaluate(&rule, &inputs).unwrap();
        assert!(matches!(
            eval,
            Evaluation::NoFiring(DeclineReason::UndefinedBaseline { .. })
        ));
    }

    #[test]
    fn optional_baseline_does_not_block() {
        let rule = Rule::from_spec(spec(
            Condition::ValueAtLeast {
                metric: None,
                value: 100.0,
            },
            vec![MetricRef::optional_baseline("cost")],
        ));
        let inputs =
            EvaluationInputs::new("cost").with_metric(MetricView::current_only("cost", 250.0));
        let Evaluation::Firing(firing) = evaluate(&rule, &inputs).unwrap() else {
            panic!("expected firing");
        };
        assert_eq!(firing.deviation_pct, None);
        assert_eq!(firing.evidence["cost.baseline_mean"], Value::Null);
    }

    #[test]
    fn zero_mean_leaf_is_false() {
        let rule = Rule::from_spec(spec(
            Condition::DeviationAtLeast {
                metric: None,
                pct: 0.1,
            },
            vec![MetricRef::new("conversions")],
        ));
        let inputs = EvaluationInputs::new("conversions").with_metric(
            MetricView::current_only("conversions", 5.0).with_baseline(baseline(0.0, 0.0)),
        );
        assert_eq!(
            evaluate(&rule, &inputs).unwrap(),
            Evaluation::NoFiring(DeclineReason::ConditionNotMet)
        );
    }

    #[test]
    fn zero_stddev_z_score_is_false() {
        let cond = Condition::ZScoreAtLeast {
            metric: None,
            z: 2.0,
        };
        let inputs = EvaluationInputs::new("m")
            .with_metric(MetricView::current_only("m", 10.0).with_baseline(baseline(5.0, 0.0)));
        assert!(!cond.evaluate(&inputs).unwrap());
    }

    #[test]
    fn missing_metric_is_an_error() {
        let cond = Condition::ValueAtLeast {
            metric: Some("revenue".to_string()),
            value: 1.0,
        };
        let err = cond.evaluate(&page_42()).unwrap_err();
        assert_eq!(
            err,
            RuleError::MissingMetric {
                metric: "revenue".to_string()
            }
        );
        let common = err.into_common(&RuleId::from("r"), &EntityId::from("e"));
        assert_eq!(common.code(), 22);
    }

    #[test]
    fn non_finite_current_is_an_error() {
        let rule = Rule::from_spec(spec(decay_condition(), vec![MetricRef::new("sessions")]));
        let inputs = EvaluationInputs::new("sessions")
            .with_metric(MetricView::current_only("sessions", f64::NAN));
        assert!(matches!(
            evaluate(&rule, &inputs),
            Err(RuleError::NonFiniteInput { .. })
        ));
    }

    #[test]
    fn no_current_value_declines() {
        let mut view = MetricView::current_only("sessions", 0.0);
        view.current = None;
        let rule = Rule::from_spec(spec(decay_condition(), vec![MetricRef::new("sessions")]));
        let eval = evaluate(&rule, &EvaluationInputs::new("sessions").with_metric(view)).unwrap();
        assert_eq!(
            eval,
            Evaluation::NoFiring(DeclineReason::NoCurrentData {
                metric: "sessions".to_string()
            })
        );
    }

    #[test]
    fn boolean_combinators() {
        let inputs = page_42();
        let yes = Condition::ValueAtLeast {
            metric: None,
            value: 1.0,
        };
        let no = Condition::ValueAtMost {
            metric: None,
            value: 1.0,
        };
        let any = Condition::Any {
            conditions: vec![no.clone(), yes.clone()],
        };
        let all = Condition::All {
            conditions: vec![no.clone(), yes],
        };
        let not = Condition::Not {
            condition: Box::new(no),
        };
        assert!(any.evaluate(&inputs).unwrap());
        assert!(!all.evaluate(&inputs).unwrap());
        assert!(not.evaluate(&inputs).unwrap());
    }

    #[test]
    fn percentile_leaf_without_cohort_is_false() {
        let cond = Condition::PercentileAtLeast {
            metric: None,
            pct: 0.5,
        };
        assert!(!cond.evaluate(&page_42()).unwrap());

        let inputs = EvaluationInputs::new("cost")
            .with_metric(MetricView::current_only("cost", 9.0).with_percentile(0.8));
        assert!(cond.evaluate(&inputs).unwrap());
    }

    #[test]
    fn closure_predicate_error_propagates() {
        let rule = Rule::with_predicate(
            spec(decay_condition(), vec![MetricRef::new("sessions")]),
            |_: &EvaluationInputs| -> Result<bool, RuleError> {
                Err(RuleError::Predicate("boom".into()))
            },
        );
        assert_eq!(
            evaluate(&rule, &page_42()),
            Err(RuleError::Predicate("boom".into()))
        );
    }

    #[test]
    fn view_from_series_requires_current_period() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let series = MetricSeries::from_values(
            EntityId::from("p"),
            EntityType::Page,
            "sessions",
            start,
            7,
            &[10.0, 11.0, 12.0, 13.0],
        )
        .unwrap();
        let req = BaselineRequest::trailing(3, 3);
        let stale = MetricView::from_series(&series, start, &req, 4);
        assert_eq!(stale.current, None);

        let current_start = series.current().unwrap().period_start;
        let view = MetricView::from_series(&series, current_start, &req, 4);
        assert_eq!(view.current, Some(13.0));
        assert_eq!(view.baseline.unwrap().mean, 11.0);
        assert_eq!(view.trend.pattern, TrendPattern::DeceleratingImprovement);
    }
}
