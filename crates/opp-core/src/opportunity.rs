//! The opportunity record handed to sinks.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use opp_common::{EntityId, EntityType, OpportunityId, RuleId};
use opp_config::RuleSpec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rule::Firing;
use crate::scorer::{Priority, Scores};

/// Lifecycle status. The engine only ever creates `New`; consumers move
/// records through the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    #[default]
    New,
    Acknowledged,
    Resolved,
    Dismissed,
}

/// A scored, explained rule firing for one entity and period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Opportunity {
    /// Stable across runs: derived from entity, rule and period.
    pub id: OpportunityId,
    pub entity_id: EntityId,
    pub entity_type: EntityType,
    pub rule_id: RuleId,
    pub category: String,
    pub opportunity_type: String,
    pub title: String,
    pub priority: Priority,
    pub status: OpportunityStatus,
    /// `"<metric>.<field>"` → value.
    pub evidence: BTreeMap<String, Value>,
    /// 0-1.
    pub confidence_score: f64,
    /// 0-100.
    pub potential_impact_score: f64,
    /// 0-100.
    pub urgency_score: f64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub detected_at: DateTime<Utc>,
    pub recommended_actions: Vec<String>,
}

/// Inputs that identify where and when a firing happened.
#[derive(Debug, Clone, Copy)]
pub struct FiringContext<'a> {
    pub entity_id: &'a EntityId,
    pub entity_type: EntityType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub detected_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn build(ctx: FiringContext<'_>, rule: &RuleSpec, firing: &Firing, scores: Scores) -> Self {
        let rule_id = RuleId::new(rule.id.clone());
        Self {
            id: OpportunityId::derive(ctx.entity_id, &rule_id, ctx.period_start, ctx.period_end),
            entity_id: ctx.entity_id.clone(),
            entity_type: ctx.entity_type,
            rule_id,
            category: rule.category.clone(),
            opportunity_type: rule.opportunity_type.clone(),
            title: rule.title.clone(),
            priority: scores.priority,
            status: OpportunityStatus::New,
            evidence: firing.evidence.clone(),
            confidence_score: scores.confidence,
            potential_impact_score: scores.impact,
            urgency_score: scores.urgency,
            period_start: ctx.period_start,
            period_end: ctx.period_end,
            detected_at: ctx.detected_at,
            recommended_actions: rule
                .recommended_actions
                .iter()
                .map(|t| render_action(t, &ctx, firing))
                .collect(),
        }
    }
}

/// Fill `{placeholder}` slots in an action template. Unknown placeholders
/// are left as written.
pub fn render_action(template: &str, ctx: &FiringContext<'_>, firing: &Firing) -> String {
    let fmt_num = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |x| format!("{:.2}", x));
    let deviation = firing
        .deviation_pct
        .map_or_else(|| "n/a".to_string(), |d| format!("{:+.1}%", d * 100.0));

    let values: [(&str, String); 8] = [
        ("entity_id", ctx.entity_id.to_string()),
        ("entity_type", ctx.entity_type.to_string()),
        ("metric", firing.metric.clone()),
        ("current", fmt_num(Some(firing.current))),
        ("baseline_mean", fmt_num(firing.baseline_mean)),
        ("deviation_pct", deviation),
        ("trend", firing.trend.pattern.to_string()),
        ("run_length", firing.trend.consecutive_run_length.to_string()),
    ];

    let mut out = template.to_string();
    for (key, value) in &values {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trend::classify_values;
    use opp_config::RuleCatalog;

    fn firing() -> Firing {
        Firing {
            rule_id: RuleId::from("page_traffic_decay"),
            metric: "sessions".to_string(),
            current: 500.0,
            baseline_mean: Some(883.333),
            deviation_pct: Some(-0.434),
            z_score: Some(-3.04),
            trend: classify_values(&[1000.0, 900.0, 750.0, 500.0], 4),
            evidence: BTreeMap::new(),
        }
    }

    fn ctx(entity: &EntityId) -> FiringContext<'_> {
        FiringContext {
            entity_id: entity,
            entity_type: EntityType::Page,
            period_start: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2026, 4, 30).unwrap(),
            detected_at: DateTime::parse_from_rfc3339("2026-05-01T06:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[test]
    fn renders_placeholders() {
        let entity = EntityId::from("page_42");
        let text = render_action(
            "Refresh {entity_id}: {metric} at {current} vs {baseline_mean} ({deviation_pct}), {trend} for {run_length}",
            &ctx(&entity),
            &firing(),
        );
        assert_eq!(
            text,
            "Refresh page_42: sessions at 500.00 vs 883.33 (-43.4%), accelerating_decline for 3"
        );
    }

    #[test]
    fn unknown_placeholder_left_alone() {
        let entity = EntityId::from("page_42");
        assert_eq!(render_action("{nope}", &ctx(&entity), &firing()), "{nope}");
    }

    #[test]
    fn build_copies_rule_and_scores() {
        let catalog = RuleCatalog::builtin();
        let rule = catalog.get("page_traffic_decay").unwrap();
        let entity = EntityId::from("page_42");
        let scores = Scores {
            confidence: 0.81,
            impact: 72.1,
            urgency: 96.0,
            priority: Priority::High,
        };
        let opp = Opportunity::build(ctx(&entity), rule, &firing(), scores);
        assert_eq!(opp.status, OpportunityStatus::New);
        assert_eq!(opp.category, rule.category);
        assert_eq!(opp.recommended_actions.len(), rule.recommended_actions.len());
        assert!(opp.id.0.starts_with("opp-"));

        let again = Opportunity::build(ctx(&entity), rule, &firing(), scores);
        assert_eq!(opp, again);

        let json = serde_json::to_value(&opp).unwrap();
        assert_eq!(json["priority"], "high");
        assert_eq!(json["status"], "new");
        assert_eq!(json["entity_type"], "page");
    }
}
