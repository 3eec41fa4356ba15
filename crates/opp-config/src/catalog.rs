//! Builtin representative rule catalog.
//!
//! One or two rules per business area, enough to exercise every condition
//! leaf, both baseline windows, all three severities and category dedup.
//! Deployments are expected to ship their own rules.json.

use opp_common::{EntityType, TrendPattern};

use crate::rules::{
    BaselineSpec, Condition, EvidenceField, MetricRef, RuleCatalog, RuleSpec, Severity, WindowKind,
};

const DECLINES: &[TrendPattern] = &[
    TrendPattern::Declining,
    TrendPattern::AcceleratingDecline,
    TrendPattern::DeceleratingDecline,
];

const RISES: &[TrendPattern] = &[
    TrendPattern::Improving,
    TrendPattern::AcceleratingImprovement,
];

impl RuleCatalog {
    /// The builtin catalog.
    pub fn builtin() -> Self {
        RuleCatalog {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            catalog_id: Some("builtin".to_string()),
            rules: builtin_rules(),
        }
    }
}

fn trailing(n: usize) -> BaselineSpec {
    BaselineSpec {
        window: WindowKind::TrailingNPeriods,
        window_size: n,
        min_samples: None,
    }
}

fn dev_at_most(pct: f64) -> Condition {
    Condition::DeviationAtMost { metric: None, pct }
}

fn dev_at_least(pct: f64) -> Condition {
    Condition::DeviationAtLeast { metric: None, pct }
}

fn trend_in(patterns: &[TrendPattern], min_run: u32) -> Condition {
    Condition::TrendIn {
        metric: None,
        patterns: patterns.to_vec(),
        min_run,
    }
}

fn value_at_least(metric: &str, value: f64) -> Condition {
    Condition::ValueAtLeast {
        metric: Some(metric.to_string()),
        value,
    }
}

fn trend_evidence() -> Vec<EvidenceField> {
    vec![
        EvidenceField::Current,
        EvidenceField::BaselineMean,
        EvidenceField::BaselineSamples,
        EvidenceField::DeviationPct,
        EvidenceField::Trend,
        EvidenceField::RunLength,
        EvidenceField::Deltas,
    ]
}

#[allow(clippy::too_many_arguments)]
fn rule(
    id: &str,
    title: &str,
    category: &str,
    opportunity_type: &str,
    types: &[EntityType],
    metrics: Vec<MetricRef>,
    baseline: BaselineSpec,
    condition: Condition,
    base_confidence: f64,
) -> RuleSpec {
    RuleSpec {
        id: id.to_string(),
        title: title.to_string(),
        description: None,
        category: category.to_string(),
        opportunity_type: opportunity_type.to_string(),
        applicable_entity_types: types.to_vec(),
        metrics,
        baseline,
        condition,
        evidence: trend_evidence(),
        base_confidence,
        severity: Severity::Standard,
        traffic_metric: None,
        recommended_actions: Vec::new(),
        enabled: true,
    }
}

fn builtin_rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec {
            traffic_metric: Some("sessions".to_string()),
            recommended_actions: vec![
                "Refresh the content on {entity_id}; sessions are {deviation_pct} vs the trailing average".to_string(),
                "Check rankings and internal links pointing to {entity_id}".to_string(),
            ],
            ..rule(
                "page_traffic_decay",
                "Page traffic decaying",
                "content_performance",
                "content_decay",
                &[EntityType::Page],
                vec![MetricRef::new("sessions")],
                trailing(3),
                Condition::All {
                    conditions: vec![dev_at_most(-0.2), trend_in(DECLINES, 2)],
                },
                0.6,
            )
        },
        RuleSpec {
            description: Some(
                "Sessions well below the same period in prior years".to_string(),
            ),
            traffic_metric: Some("sessions".to_string()),
            evidence: vec![
                EvidenceField::Current,
                EvidenceField::BaselineMean,
                EvidenceField::BaselineWindow,
                EvidenceField::BaselineSamples,
                EvidenceField::DeviationPct,
            ],
            recommended_actions: vec![
                "Compare {entity_id} against last year's version and restore what was lost".to_string(),
            ],
            ..rule(
                "page_multi_timeframe_decay",
                "Page traffic below prior years",
                "content_performance",
                "content_decay",
                &[EntityType::Page],
                vec![MetricRef::new("sessions")],
                BaselineSpec {
                    window: WindowKind::SamePeriodPriorYear,
                    window_size: 3,
                    min_samples: Some(2),
                },
                dev_at_most(-0.25),
                0.55,
            )
        },
        RuleSpec {
            severity: Severity::Informational,
            traffic_metric: Some("sessions".to_string()),
            recommended_actions: vec![
                "Add conversion paths to {entity_id} while traffic is rising ({trend}, {run_length} periods)".to_string(),
            ],
            ..rule(
                "page_rising_star",
                "Page traffic rising",
                "content_growth",
                "rising_content",
                &[EntityType::Page],
                vec![MetricRef::new("sessions")],
                trailing(3),
                Condition::All {
                    conditions: vec![dev_at_least(0.3), trend_in(RISES, 2)],
                },
                0.5,
            )
        },
        RuleSpec {
            traffic_metric: Some("sessions".to_string()),
            recommended_actions: vec![
                "Review recent changes to forms and checkout on {entity_id}".to_string(),
            ],
            ..rule(
                "conversion_rate_drop",
                "Conversion rate dropped",
                "conversion",
                "conversion_rate_drop",
                &[EntityType::Page, EntityType::Campaign],
                vec![
                    MetricRef::new("conversion_rate"),
                    MetricRef::optional_baseline("sessions"),
                ],
                trailing(4),
                Condition::All {
                    conditions: vec![dev_at_most(-0.25), value_at_least("sessions", 100.0)],
                },
                0.6,
            )
        },
        RuleSpec {
            description: Some(
                "High-spend campaign with zero conversions this period".to_string(),
            ),
            severity: Severity::Crisis,
            traffic_metric: Some("cost".to_string()),
            evidence: vec![EvidenceField::Current, EvidenceField::PeerPercentile],
            recommended_actions: vec![
                "Pause or restructure {entity_id}: {current} spent with no conversions".to_string(),
            ],
            ..rule(
                "campaign_cost_no_conversions",
                "Campaign spending without conversions",
                "spend_efficiency",
                "wasted_spend",
                &[EntityType::Campaign],
                vec![
                    MetricRef::optional_baseline("cost"),
                    MetricRef::optional_baseline("conversions"),
                ],
                trailing(3),
                Condition::All {
                    conditions: vec![
                        Condition::PercentileAtLeast {
                            metric: None,
                            pct: 0.75,
                        },
                        value_at_least("cost", 1.0),
                        Condition::ValueAtMost {
                            metric: Some("conversions".to_string()),
                            value: 0.0,
                        },
                    ],
                },
                0.7,
            )
        },
        RuleSpec {
            traffic_metric: Some("cost".to_string()),
            recommended_actions: vec![
                "Audit bids and targeting on {entity_id}; CPA is {deviation_pct} vs baseline".to_string(),
            ],
            ..rule(
                "campaign_cpa_spike",
                "Campaign cost per acquisition spiking",
                "spend_efficiency",
                "cpa_spike",
                &[EntityType::Campaign],
                vec![MetricRef::new("cpa")],
                trailing(4),
                Condition::Any {
                    conditions: vec![
                        dev_at_least(0.4),
                        Condition::ZScoreAtLeast { metric: None, z: 2.5 },
                    ],
                },
                0.6,
            )
        },
        RuleSpec {
            traffic_metric: Some("impressions".to_string()),
            recommended_actions: vec![
                "Rewrite the title and description shown for '{entity_id}'".to_string(),
            ],
            ..rule(
                "keyword_ctr_drop",
                "Keyword click-through rate dropped",
                "search_visibility",
                "ctr_decline",
                &[EntityType::Keyword],
                vec![
                    MetricRef::new("ctr"),
                    MetricRef::optional_baseline("impressions"),
                ],
                trailing(4),
                Condition::All {
                    conditions: vec![dev_at_most(-0.3), value_at_least("impressions", 500.0)],
                },
                0.55,
            )
        },
        RuleSpec {
            description: Some(
                "Average position number rising, i.e. the keyword is ranking lower".to_string(),
            ),
            traffic_metric: Some("impressions".to_string()),
            recommended_actions: vec![
                "Investigate ranking loss for '{entity_id}' (position {current}, was {baseline_mean})".to_string(),
            ],
            ..rule(
                "keyword_position_slide",
                "Keyword ranking slipping",
                "search_visibility",
                "ranking_loss",
                &[EntityType::Keyword],
                vec![
                    MetricRef::new("position"),
                    MetricRef::optional_baseline("impressions"),
                ],
                trailing(4),
                Condition::All {
                    conditions: vec![dev_at_least(0.3), trend_in(RISES, 2)],
                },
                0.5,
            )
        },
        RuleSpec {
            recommended_actions: vec![
                "Test new subject lines for {entity_id}; opens are {deviation_pct} vs recent sends".to_string(),
            ],
            ..rule(
                "email_open_rate_decline",
                "Email open rate declining",
                "email_engagement",
                "engagement_decline",
                &[EntityType::Email],
                vec![MetricRef::new("open_rate")],
                trailing(4),
                Condition::All {
                    conditions: vec![dev_at_most(-0.15), trend_in(DECLINES, 2)],
                },
                0.55,
            )
        },
        RuleSpec {
            severity: Severity::Crisis,
            evidence: vec![
                EvidenceField::Current,
                EvidenceField::BaselineMean,
                EvidenceField::BaselineStddev,
                EvidenceField::ZScore,
                EvidenceField::DeviationPct,
            ],
            recommended_actions: vec![
                "Check list hygiene and send frequency for {entity_id}".to_string(),
            ],
            ..rule(
                "email_unsubscribe_spike",
                "Unsubscribe rate spiking",
                "email_health",
                "list_health",
                &[EntityType::Email],
                vec![MetricRef::new("unsubscribe_rate")],
                trailing(4),
                Condition::Any {
                    conditions: vec![
                        Condition::ZScoreAtLeast { metric: None, z: 3.0 },
                        dev_at_least(1.0),
                    ],
                },
                0.65,
            )
        },
        RuleSpec {
            severity: Severity::Crisis,
            recommended_actions: vec![
                "Break down {entity_id} revenue by channel to locate the drop ({deviation_pct})".to_string(),
            ],
            ..rule(
                "revenue_decline",
                "Revenue declining",
                "revenue",
                "revenue_decline",
                &[EntityType::Aggregate],
                vec![MetricRef::new("revenue")],
                trailing(3),
                dev_at_most(-0.15),
                0.7,
            )
        },
    ]
}
