//! Detection engine: entities × rules → ranked opportunities.
//!
//! A run proceeds in four steps:
//! 1. peer cohorts are fetched and ranked once per (entity type, metric)
//! 2. entities are split into batches; cancellation is checked before each
//! 3. within a batch, up to `max_workers` scoped threads pull entities from a
//!    shared cursor and evaluate every applicable rule
//! 4. firings are deduplicated per (entity, category) and sorted
//!
//! A failure inside one (entity, rule) pair never aborts the run. Malformed
//! series, source errors, predicate errors and panics are logged, counted in
//! [`RunReport::skipped`] and the pair is dropped.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, Utc};
use opp_common::{Entity, EntityId, EntityType};
use opp_config::{ConfigSnapshot, EngineSettings, ScoringPolicy};
use serde::{Deserialize, Serialize};
use tracing::info_span;

use crate::baseline::{self, BaselineRequest};
use crate::logging::{event_names, generate_run_id, LogContext, Stage};
use crate::opportunity::{FiringContext, Opportunity};
use crate::rule::{evaluate, DeclineReason, Evaluation, EvaluationInputs, MetricView, Rule};
use crate::scorer::OpportunityScorer;
use crate::series::MetricSeries;
use crate::source::{DateRange, MetricSource};

/// Skip counter keys.
pub mod skip_kinds {
    pub const MALFORMED_SERIES: &str = "malformed_series";
    pub const SOURCE_ERROR: &str = "source_error";
    pub const RULE_EVALUATION: &str = "rule_evaluation";
    pub const PANIC: &str = "panic";
}

/// Shared cancellation flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancel from a watchdog thread once `timeout` elapses.
    pub fn cancel_after(&self, timeout: Duration) {
        let flag = self.0.clone();
        thread::spawn(move || {
            thread::sleep(timeout);
            flag.store(true, Ordering::SeqCst);
        });
    }
}

/// Per-run identity.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Stamped on every opportunity. Fixing it makes runs reproducible.
    pub detected_at: DateTime<Utc>,
    pub run_id: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            detected_at: Utc::now(),
            run_id: generate_run_id(),
        }
    }
}

impl RunOptions {
    pub fn at(detected_at: DateTime<Utc>) -> Self {
        Self {
            detected_at,
            ..Self::default()
        }
    }
}

/// Outcome of a run. Partial runs (skips, cancellation) still carry every
/// opportunity that was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub schema_version: String,
    pub period: DateRange,
    pub detected_at: DateTime<Utc>,
    pub opportunities: Vec<Opportunity>,
    /// Pairs attempted: fired + declined + skipped.
    pub evaluated: u64,
    pub fired: u64,
    pub declined: BTreeMap<String, u64>,
    pub skipped: BTreeMap<String, u64>,
    /// Firings dropped by per-category dedup.
    pub deduplicated: u64,
    pub cancelled: bool,
    pub batches_completed: usize,
    pub batches_total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigSnapshot>,
}

impl RunReport {
    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }

    pub fn declined_total(&self) -> u64 {
        self.declined.values().sum()
    }

    pub fn with_config(mut self, snapshot: ConfigSnapshot) -> Self {
        self.config = Some(snapshot);
        self
    }
}

/// Why a pair was skipped.
#[derive(Debug, Clone)]
struct SkipCause {
    kind: &'static str,
    message: String,
}

enum PairOutcome {
    Fired(Box<Opportunity>),
    Declined(DeclineReason),
}

#[derive(Default)]
struct Tally {
    opportunities: Vec<Opportunity>,
    evaluated: u64,
    declined: BTreeMap<String, u64>,
    skipped: BTreeMap<String, u64>,
}

impl Tally {
    fn merge(&mut self, other: Tally) {
        self.opportunities.extend(other.opportunities);
        self.evaluated += other.evaluated;
        for (k, v) in other.declined {
            *self.declined.entry(k).or_default() += v;
        }
        for (k, v) in other.skipped {
            *self.skipped.entry(k).or_default() += v;
        }
    }

    fn skip(&mut self, kind: &str) {
        *self.skipped.entry(kind.to_string()).or_default() += 1;
    }
}

/// Cohort percentile ranks keyed by (entity type, metric).
type Cohorts = HashMap<(EntityType, String), HashMap<EntityId, f64>>;

/// Everything a worker needs, shared read-only across threads.
struct RunScope<'a> {
    rules: &'a [Rule],
    period: DateRange,
    history: DateRange,
    cohorts: &'a Cohorts,
    detected_at: DateTime<Utc>,
    ctx: &'a LogContext,
}

pub struct DetectionEngine {
    source: Arc<dyn MetricSource>,
    scorer: OpportunityScorer,
    settings: EngineSettings,
}

impl DetectionEngine {
    pub fn new(source: Arc<dyn MetricSource>, policy: ScoringPolicy, settings: EngineSettings) -> Self {
        Self {
            source,
            scorer: OpportunityScorer::new(policy),
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn scorer(&self) -> &OpportunityScorer {
        &self.scorer
    }

    pub fn run(
        &self,
        entities: &[Entity],
        rules: &[Rule],
        period: DateRange,
        cancel: &CancellationToken,
    ) -> RunReport {
        self.run_with_options(entities, rules, period, cancel, &RunOptions::default())
    }

    pub fn run_with_options(
        &self,
        entities: &[Entity],
        rules: &[Rule],
        period: DateRange,
        cancel: &CancellationToken,
        options: &RunOptions,
    ) -> RunReport {
        let ctx = LogContext::new(options.run_id.clone());
        let span = info_span!("run", run_id = %ctx.run_id, stage = "detect");
        let _enter = span.enter();

        crate::log_event!(
            ctx,
            INFO,
            event_names::RUN_STARTED,
            Stage::Detect,
            "detection run started",
            entities = entities.len() as u64,
            rules = rules.len() as u64,
            period = period.to_string().as_str()
        );

        let cohorts = self.load_cohorts(entities, rules, period, &ctx);
        let history = history_range(period, self.settings.history_days);
        let scope = RunScope {
            rules,
            period,
            history,
            cohorts: &cohorts,
            detected_at: options.detected_at,
            ctx: &ctx,
        };

        let batch_size = self.settings.batch_size.max(1);
        let batches_total = entities.len().div_ceil(batch_size);
        let mut tally = Tally::default();
        let mut batches_completed = 0;
        let mut cancelled = false;

        for (index, batch) in entities.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                crate::log_event!(
                    ctx,
                    WARN,
                    event_names::DETECT_CANCELLED,
                    Stage::Detect,
                    "run cancelled, remaining batches skipped",
                    batches_completed = batches_completed as u64,
                    batches_total = batches_total as u64
                );
                break;
            }

            crate::log_event!(
                ctx,
                DEBUG,
                event_names::DETECT_BATCH_STARTED,
                Stage::Detect,
                "batch started",
                batch = index as u64,
                size = batch.len() as u64
            );
            let result = self.run_batch(batch, &scope);
            crate::log_event!(
                ctx,
                INFO,
                event_names::DETECT_BATCH_DONE,
                Stage::Detect,
                "batch done",
                batch = index as u64,
                evaluated = result.evaluated,
                fired = result.opportunities.len() as u64
            );
            tally.merge(result);
            batches_completed += 1;
        }

        let fired = tally.opportunities.len() as u64;
        let (mut opportunities, dropped) = dedup_by_category(tally.opportunities);
        for opp in &dropped {
            crate::log_event!(
                ctx,
                DEBUG,
                event_names::DEDUP_DROPPED,
                Stage::Dedup,
                "lower-urgency firing in same category dropped",
                entity_id = opp.entity_id.as_str(),
                rule_id = opp.rule_id.as_str(),
                category = opp.category.as_str()
            );
        }
        sort_opportunities(&mut opportunities);

        let report = RunReport {
            run_id: options.run_id.clone(),
            schema_version: opp_common::SCHEMA_VERSION.to_string(),
            period,
            detected_at: options.detected_at,
            opportunities,
            evaluated: tally.evaluated,
            fired,
            declined: tally.declined,
            skipped: tally.skipped,
            deduplicated: dropped.len() as u64,
            cancelled,
            batches_completed,
            batches_total,
            config: None,
        };

        crate::log_event!(
            ctx,
            INFO,
            event_names::RUN_FINISHED,
            Stage::Detect,
            "detection run finished",
            evaluated = report.evaluated,
            fired = report.fired,
            opportunities = report.opportunities.len() as u64,
            skipped = report.skipped_total(),
            cancelled = report.cancelled
        );
        report
    }

    /// Rank every cohort any rule may read: percentile leaves and traffic
    /// metrics, for each entity type present in the run.
    fn load_cohorts(
        &self,
        entities: &[Entity],
        rules: &[Rule],
        period: DateRange,
        ctx: &LogContext,
    ) -> Cohorts {
        let present: BTreeSet<EntityType> = entities.iter().map(|e| e.entity_type).collect();
        let mut wanted: BTreeSet<(EntityType, String)> = BTreeSet::new();

        for rule in rules {
            let spec = rule.spec();
            let Some(primary) = spec.primary_metric() else {
                continue;
            };
            let mut metrics: Vec<String> = spec
                .condition
                .percentile_metrics()
                .into_iter()
                .map(|m| m.unwrap_or_else(|| primary.to_string()))
                .collect();
            metrics.extend(spec.traffic_metric.clone());

            for ty in spec
                .applicable_entity_types
                .iter()
                .filter(|t| present.contains(t))
            {
                for m in &metrics {
                    wanted.insert((*ty, m.clone()));
                }
            }
        }

        let mut cohorts = Cohorts::new();
        for (ty, metric) in wanted {
            match self.source.fetch_peer_values(ty, &metric, period) {
                Ok(peers) => {
                    crate::log_event!(
                        ctx,
                        DEBUG,
                        event_names::LOAD_PEERS,
                        Stage::Load,
                        "peer cohort ranked",
                        entity_type = ty.as_str(),
                        metric = metric.as_str(),
                        peers = peers.len() as u64
                    );
                    cohorts.insert((ty, metric), baseline::percentile_ranks(&peers));
                }
                Err(e) => {
                    crate::log_event!(
                        ctx,
                        WARN,
                        event_names::LOAD_PEERS,
                        Stage::Load,
                        "peer cohort unavailable",
                        entity_type = ty.as_str(),
                        metric = metric.as_str(),
                        error = e.to_string().as_str()
                    );
                }
            }
        }
        cohorts
    }

    fn run_batch(&self, batch: &[Entity], scope: &RunScope<'_>) -> Tally {
        let workers = self.settings.max_workers.max(1).min(batch.len());
        let next = AtomicUsize::new(0);
        let cursor = &next;
        let mut tally = Tally::default();

        thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    s.spawn(move || {
                        let mut local = Tally::default();
                        loop {
                            let i = cursor.fetch_add(1, Ordering::Relaxed);
                            let Some(entity) = batch.get(i) else {
                                break;
                            };
                            local.merge(self.process_entity(entity, scope));
                        }
                        local
                    })
                })
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok(local) => tally.merge(local),
                    Err(_) => {
                        crate::log_event!(
                            scope.ctx,
                            ERROR,
                            event_names::INTERNAL_ERROR,
                            Stage::Detect,
                            "detection worker panicked"
                        );
                        tally.skip(skip_kinds::PANIC);
                    }
                }
            }
        });

        tally
    }

    fn process_entity(&self, entity: &Entity, scope: &RunScope<'_>) -> Tally {
        let span = info_span!("entity", entity_id = %entity.id);
        let _enter = span.enter();

        let mut tally = Tally::default();
        let mut cache: HashMap<String, Result<Arc<MetricSeries>, SkipCause>> = HashMap::new();

        for rule in scope
            .rules
            .iter()
            .filter(|r| r.spec().applies_to(entity.entity_type))
        {
            tally.evaluated += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                self.evaluate_pair(entity, rule, scope, &mut cache)
            }));

            match outcome {
                Ok(Ok(PairOutcome::Fired(opp))) => {
                    crate::log_event!(
                        scope.ctx,
                        DEBUG,
                        event_names::DETECT_FIRED,
                        Stage::Score,
                        "rule fired",
                        entity_id = entity.id.as_str(),
                        rule_id = rule.id().as_str(),
                        priority = opp.priority.as_str(),
                        urgency = opp.urgency_score
                    );
                    tally.opportunities.push(*opp);
                }
                Ok(Ok(PairOutcome::Declined(reason))) => {
                    crate::log_event!(
                        scope.ctx,
                        DEBUG,
                        event_names::DETECT_DECLINED,
                        Stage::Detect,
                        "rule declined",
                        entity_id = entity.id.as_str(),
                        rule_id = rule.id().as_str(),
                        reason = reason.kind(),
                        detail = reason.to_string().as_str()
                    );
                    *tally.declined.entry(reason.kind().to_string()).or_default() += 1;
                }
                Ok(Err(cause)) => {
                    crate::log_event!(
                        scope.ctx,
                        WARN,
                        event_names::DETECT_PAIR_SKIPPED,
                        Stage::Detect,
                        "pair skipped",
                        entity_id = entity.id.as_str(),
                        rule_id = rule.id().as_str(),
                        reason = cause.kind,
                        error = cause.message.as_str()
                    );
                    tally.skip(cause.kind);
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    crate::log_event!(
                        scope.ctx,
                        ERROR,
                        event_names::DETECT_PAIR_SKIPPED,
                        Stage::Detect,
                        "pair panicked",
                        entity_id = entity.id.as_str(),
                        rule_id = rule.id().as_str(),
                        reason = skip_kinds::PANIC,
                        error = message.as_str()
                    );
                    tally.skip(skip_kinds::PANIC);
                }
            }
        }
        tally
    }

    fn evaluate_pair(
        &self,
        entity: &Entity,
        rule: &Rule,
        scope: &RunScope<'_>,
        cache: &mut HashMap<String, Result<Arc<MetricSeries>, SkipCause>>,
    ) -> Result<PairOutcome, SkipCause> {
        let spec = rule.spec();
        let primary = spec.primary_metric().ok_or_else(|| SkipCause {
            kind: skip_kinds::RULE_EVALUATION,
            message: "rule declares no metrics".to_string(),
        })?;
        let request = BaselineRequest::from_spec(&spec.baseline, &self.settings);

        let mut inputs = EvaluationInputs::new(primary);
        for metric in rule.metric_names() {
            let series = cache
                .entry(metric.to_string())
                .or_insert_with(|| {
                    self.source
                        .fetch_series(entity, metric, scope.history)
                        .map(Arc::new)
                        .map_err(|e| SkipCause {
                            kind: e.kind(),
                            message: e.to_string(),
                        })
                })
                .clone()?;

            let mut view =
                MetricView::from_series(&series, scope.period.start, &request, self.settings.lookback);
            view.peer_percentile = cohort_rank(scope.cohorts, entity, metric);
            inputs = inputs.with_metric(view);
        }

        let evaluation = evaluate(rule, &inputs).map_err(|e| SkipCause {
            kind: skip_kinds::RULE_EVALUATION,
            message: e.to_string(),
        })?;

        let firing = match evaluation {
            Evaluation::NoFiring(reason) => return Ok(PairOutcome::Declined(reason)),
            Evaluation::Firing(firing) => firing,
        };

        let traffic = spec
            .traffic_metric
            .as_deref()
            .and_then(|m| cohort_rank(scope.cohorts, entity, m))
            .unwrap_or(self.settings.default_traffic_percentile);
        let scores = self.scorer.score(spec, &firing, traffic);

        let ctx = FiringContext {
            entity_id: &entity.id,
            entity_type: entity.entity_type,
            period_start: scope.period.start,
            period_end: scope.period.end,
            detected_at: scope.detected_at,
        };
        Ok(PairOutcome::Fired(Box::new(Opportunity::build(
            ctx, spec, &firing, scores,
        ))))
    }
}

/// Fetch window for a scan: `history_days` before the period start through
/// its end. Saturates at the earliest representable date.
fn history_range(period: DateRange, history_days: i64) -> DateRange {
    let days = Days::new(history_days.max(0).unsigned_abs());
    let start = period.start.checked_sub_days(days).unwrap_or(NaiveDate::MIN);
    DateRange::new(start, period.end)
}

fn cohort_rank(cohorts: &Cohorts, entity: &Entity, metric: &str) -> Option<f64> {
    cohorts
        .get(&(entity.entity_type, metric.to_string()))
        .and_then(|ranks| ranks.get(&entity.id))
        .copied()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Survivor order within an (entity, category) group: higher urgency, then
/// higher impact, then higher confidence, then lower rule id.
fn survivor_order(a: &Opportunity, b: &Opportunity) -> std::cmp::Ordering {
    b.urgency_score
        .total_cmp(&a.urgency_score)
        .then(b.potential_impact_score.total_cmp(&a.potential_impact_score))
        .then(b.confidence_score.total_cmp(&a.confidence_score))
        .then_with(|| a.rule_id.cmp(&b.rule_id))
}

/// Keep one opportunity per (entity, category). Returns survivors and the
/// dropped firings.
pub fn dedup_by_category(opportunities: Vec<Opportunity>) -> (Vec<Opportunity>, Vec<Opportunity>) {
    let mut best: BTreeMap<(EntityId, String), Opportunity> = BTreeMap::new();
    let mut dropped = Vec::new();

    for opp in opportunities {
        let key = (opp.entity_id.clone(), opp.category.clone());
        match best.remove(&key) {
            None => {
                best.insert(key, opp);
            }
            Some(current) => {
                if survivor_order(&opp, &current).is_lt() {
                    dropped.push(current);
                    best.insert(key, opp);
                } else {
                    dropped.push(opp);
                    best.insert(key, current);
                }
            }
        }
    }
    (best.into_values().collect(), dropped)
}

/// Priority desc, urgency desc, impact desc, then id asc.
pub fn sort_opportunities(opportunities: &mut [Opportunity]) {
    opportunities.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(b.urgency_score.total_cmp(&a.urgency_score))
            .then(b.potential_impact_score.total_cmp(&a.potential_impact_score))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opportunity::OpportunityStatus;
    use crate::scorer::Priority;
    use chrono::{NaiveDate, TimeZone};
    use opp_common::{OpportunityId, RuleId};

    fn opp(entity: &str, rule: &str, category: &str, urgency: f64, impact: f64) -> Opportunity {
        let start = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 4, 30).unwrap();
        Opportunity {
            id: OpportunityId::derive(&EntityId::from(entity), &RuleId::from(rule), start, end),
            entity_id: EntityId::from(entity),
            entity_type: EntityType::Page,
            rule_id: RuleId::from(rule),
            category: category.to_string(),
            opportunity_type: "t".to_string(),
            title: rule.to_string(),
            priority: if urgency >= 80.0 {
                Priority::High
            } else {
                Priority::Medium
            },
            status: OpportunityStatus::New,
            evidence: BTreeMap::new(),
            confidence_score: 0.7,
            potential_impact_score: impact,
            urgency_score: urgency,
            period_start: start,
            period_end: end,
            detected_at: Utc.timestamp_opt(0, 0).unwrap(),
            recommended_actions: vec![],
        }
    }

    #[test]
    fn dedup_keeps_higher_urgency() {
        let (kept, dropped) = dedup_by_category(vec![
            opp("p1", "a", "content", 60.0, 50.0),
            opp("p1", "b", "content", 90.0, 10.0),
            opp("p1", "c", "conversion", 40.0, 10.0),
            opp("p2", "a", "content", 30.0, 10.0),
        ]);
        assert_eq!(kept.len(), 3);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].rule_id.as_str(), "a");
        assert!(kept
            .iter()
            .any(|o| o.entity_id.as_str() == "p1" && o.rule_id.as_str() == "b"));
    }

    #[test]
    fn dedup_ties_break_on_impact_then_rule_id() {
        let (kept, _) = dedup_by_category(vec![
            opp("p1", "a", "content", 60.0, 10.0),
            opp("p1", "b", "content", 60.0, 20.0),
        ]);
        assert_eq!(kept[0].rule_id.as_str(), "b");

        let (kept, _) = dedup_by_category(vec![
            opp("p1", "z", "content", 60.0, 10.0),
            opp("p1", "m", "content", 60.0, 10.0),
        ]);
        assert_eq!(kept[0].rule_id.as_str(), "m");
    }

    #[test]
    fn sort_is_priority_then_urgency_then_impact() {
        let mut opps = vec![
            opp("p1", "a", "x", 60.0, 90.0),
            opp("p2", "a", "x", 85.0, 10.0),
            opp("p3", "a", "x", 60.0, 95.0),
            opp("p4", "a", "x", 95.0, 10.0),
        ];
        sort_opportunities(&mut opps);
        let order: Vec<_> = opps.iter().map(|o| o.entity_id.as_str()).collect();
        assert_eq!(order, vec!["p4", "p2", "p3", "p1"]);
    }

    #[test]
    fn cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_after_fires() {
        let token = CancellationToken::new();
        token.cancel_after(Duration::from_millis(1));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !token.is_cancelled() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(token.is_cancelled());
    }

    #[test]
    fn history_range_saturates_instead_of_overflowing() {
        let period = DateRange::new(
            NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 4, 30).unwrap(),
        );
        let normal = history_range(period, 800);
        assert_eq!(normal.start, NaiveDate::from_ymd_opt(2024, 1, 22).unwrap());
        assert_eq!(normal.end, period.end);

        let huge = history_range(period, 1_000_000_000_000);
        assert_eq!(huge.start, NaiveDate::MIN);
        assert_eq!(huge.end, period.end);

        assert_eq!(history_range(period, -5).start, period.start);
    }

    #[test]
    fn panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
