//! Configuration validation errors and semantic validation.

use std::collections::HashSet;

use thiserror::Error;

use crate::policy::ScoringPolicy;
use crate::rules::{Condition, RuleCatalog, RuleSpec};

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Schema validation failed: {0}")]
    SchemaError(String),

    #[error("Semantic validation failed: {0}")]
    SemanticError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 110,
            ValidationError::ParseError(_) => 111,
            ValidationError::SchemaError(_) => 112,
            ValidationError::SemanticError(_) => 113,
            ValidationError::MissingField(_) => 114,
            ValidationError::InvalidValue { .. } => 115,
            ValidationError::VersionMismatch { .. } => 116,
        }
    }
}

impl From<ValidationError> for opp_common::Error {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::IoError(msg) => opp_common::Error::Config(msg),
            ValidationError::VersionMismatch { expected, actual } => {
                opp_common::Error::VersionMismatch { expected, actual }
            }
            other => opp_common::Error::Config(other.to_string()),
        }
    }
}

/// Longest history window a policy may request (one hundred years).
pub const MAX_HISTORY_DAYS: i64 = 36_500;

/// Placeholders accepted in recommended-action templates.
pub const ACTION_PLACEHOLDERS: &[&str] = &[
    "entity_id",
    "entity_type",
    "metric",
    "current",
    "baseline_mean",
    "deviation_pct",
    "trend",
    "run_length",
];

fn check_version(actual: &str) -> ValidationResult<()> {
    if actual != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

fn check_unit(field: &str, value: f64) -> ValidationResult<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            message: format!("Must be in [0, 1], got {}", value),
        });
    }
    Ok(())
}

fn check_score(field: &str, value: f64) -> ValidationResult<()> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            message: format!("Must be in [0, 100], got {}", value),
        });
    }
    Ok(())
}

fn check_positive(field: &str, value: f64) -> ValidationResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            message: format!("Must be positive, got {}", value),
        });
    }
    Ok(())
}

/// Validate a scoring policy semantically.
pub fn validate_policy(policy: &ScoringPolicy) -> ValidationResult<()> {
    check_version(&policy.schema_version)?;

    let c = &policy.confidence;
    check_unit("confidence.run_bonus", c.run_bonus)?;
    check_unit("confidence.ceiling", c.ceiling)?;

    let i = &policy.impact;
    check_unit("impact.deviation_weight", i.deviation_weight)?;
    check_unit("impact.traffic_weight", i.traffic_weight)?;
    let weight_sum = i.deviation_weight + i.traffic_weight;
    if (weight_sum - 1.0).abs() > 0.01 {
        return Err(ValidationError::SemanticError(format!(
            "impact weights must sum to 1.0, got {} (deviation={}, traffic={})",
            weight_sum, i.deviation_weight, i.traffic_weight
        )));
    }
    check_positive("impact.deviation_saturation", i.deviation_saturation)?;

    let u = &policy.urgency;
    for (field, value) in [
        ("urgency.accelerating_decline", u.accelerating_decline),
        ("urgency.declining", u.declining),
        ("urgency.decelerating_decline", u.decelerating_decline),
        ("urgency.accelerating_improvement", u.accelerating_improvement),
        ("urgency.decelerating_improvement", u.decelerating_improvement),
        ("urgency.improving", u.improving),
        ("urgency.stable", u.stable),
        ("urgency.deviation_span", u.deviation_span),
        ("urgency.crisis_floor", u.crisis_floor),
        ("urgency.informational_cap", u.informational_cap),
    ] {
        check_score(field, value)?;
    }
    check_positive("urgency.deviation_saturation", u.deviation_saturation)?;
    if u.crisis_floor < u.informational_cap {
        return Err(ValidationError::SemanticError(format!(
            "urgency.crisis_floor ({}) must not be below urgency.informational_cap ({})",
            u.crisis_floor, u.informational_cap
        )));
    }

    let p = &policy.priority;
    check_score("priority.high_urgency", p.high_urgency)?;
    check_score("priority.high_impact", p.high_impact)?;
    check_unit("priority.high_confidence", p.high_confidence)?;
    check_score("priority.medium_urgency", p.medium_urgency)?;
    check_score("priority.medium_impact", p.medium_impact)?;
    if p.medium_urgency > p.high_urgency {
        return Err(ValidationError::SemanticError(format!(
            "priority.medium_urgency ({}) exceeds priority.high_urgency ({})",
            p.medium_urgency, p.high_urgency
        )));
    }
    if p.medium_impact > p.high_impact {
        return Err(ValidationError::SemanticError(format!(
            "priority.medium_impact ({}) exceeds priority.high_impact ({})",
            p.medium_impact, p.high_impact
        )));
    }

    let e = &policy.engine;
    if e.max_workers == 0 {
        return Err(ValidationError::InvalidValue {
            field: "engine.max_workers".to_string(),
            message: "must be >= 1".to_string(),
        });
    }
    if e.batch_size == 0 {
        return Err(ValidationError::InvalidValue {
            field: "engine.batch_size".to_string(),
            message: "must be >= 1".to_string(),
        });
    }
    if e.lookback < 2 {
        return Err(ValidationError::InvalidValue {
            field: "engine.lookback".to_string(),
            message: format!("must be >= 2, got {}", e.lookback),
        });
    }
    if e.default_min_samples == 0 {
        return Err(ValidationError::InvalidValue {
            field: "engine.default_min_samples".to_string(),
            message: "must be >= 1".to_string(),
        });
    }
    if e.min_prior_years < 2 {
        return Err(ValidationError::InvalidValue {
            field: "engine.min_prior_years".to_string(),
            message: format!("must be >= 2, got {}", e.min_prior_years),
        });
    }
    if e.history_days <= 0 || e.history_days > MAX_HISTORY_DAYS {
        return Err(ValidationError::InvalidValue {
            field: "engine.history_days".to_string(),
            message: format!(
                "must be in 1..={MAX_HISTORY_DAYS}, got {}",
                e.history_days
            ),
        });
    }
    check_unit(
        "engine.default_traffic_percentile",
        e.default_traffic_percentile,
    )?;

    Ok(())
}

/// Validate a rule catalog semantically.
///
/// Rule ids must be unique; each rule is then checked on its own.
pub fn validate_catalog(catalog: &RuleCatalog) -> ValidationResult<()> {
    check_version(&catalog.schema_version)?;

    let mut seen = HashSet::new();
    for rule in &catalog.rules {
        if !seen.insert(rule.id.as_str()) {
            return Err(ValidationError::SemanticError(format!(
                "duplicate rule id '{}'",
                rule.id
            )));
        }
        validate_rule(rule)?;
    }

    Ok(())
}

/// Validate a single rule.
pub fn validate_rule(rule: &RuleSpec) -> ValidationResult<()> {
    let prefix = format!("rules.{}", rule.id);

    if rule.id.trim().is_empty() {
        return Err(ValidationError::MissingField("rules[].id".to_string()));
    }
    if rule.category.trim().is_empty() {
        return Err(ValidationError::MissingField(format!("{}.category", prefix)));
    }
    if rule.applicable_entity_types.is_empty() {
        return Err(ValidationError::InvalidValue {
            field: format!("{}.applicable_entity_types", prefix),
            message: "must name at least one entity type".to_string(),
        });
    }
    if rule.metrics.is_empty() {
        return Err(ValidationError::InvalidValue {
            field: format!("{}.metrics", prefix),
            message: "must name at least one metric".to_string(),
        });
    }
    check_unit(&format!("{}.base_confidence", prefix), rule.base_confidence)?;

    if rule.baseline.window_size == 0 {
        return Err(ValidationError::InvalidValue {
            field: format!("{}.baseline.window_size", prefix),
            message: "must be >= 1".to_string(),
        });
    }
    if rule.baseline.min_samples == Some(0) {
        return Err(ValidationError::InvalidValue {
            field: format!("{}.baseline.min_samples", prefix),
            message: "must be >= 1".to_string(),
        });
    }

    let declared: HashSet<&str> = rule.metrics.iter().map(|m| m.name.as_str()).collect();
    for metric in rule.condition.referenced_metrics() {
        if !declared.contains(metric.as_str()) {
            return Err(ValidationError::SemanticError(format!(
                "{}.condition references undeclared metric '{}'",
                prefix, metric
            )));
        }
    }
    validate_condition(&prefix, &rule.condition)?;

    for template in &rule.recommended_actions {
        validate_template(&prefix, template)?;
    }

    Ok(())
}

fn validate_condition(prefix: &str, condition: &Condition) -> ValidationResult<()> {
    let mut result = Ok(());
    condition.walk(&mut |node| {
        if result.is_err() {
            return;
        }
        result = match node {
            Condition::All { conditions } | Condition::Any { conditions }
                if conditions.is_empty() =>
            {
                Err(ValidationError::SemanticError(format!(
                    "{}.condition has an empty group",
                    prefix
                )))
            }
            Condition::PercentileAtLeast { pct, .. } | Condition::PercentileAtMost { pct, .. } => {
                check_unit(&format!("{}.condition.pct", prefix), *pct)
            }
            Condition::TrendIn { patterns, .. } if patterns.is_empty() => {
                Err(ValidationError::InvalidValue {
                    field: format!("{}.condition.patterns", prefix),
                    message: "must name at least one pattern".to_string(),
                })
            }
            Condition::DeviationAtMost { pct, .. } | Condition::DeviationAtLeast { pct, .. }
                if !pct.is_finite() =>
            {
                Err(ValidationError::InvalidValue {
                    field: format!("{}.condition.pct", prefix),
                    message: "must be finite".to_string(),
                })
            }
            Condition::ZScoreAtLeast { z, .. } | Condition::ZScoreAtMost { z, .. }
                if !z.is_finite() =>
            {
                Err(ValidationError::InvalidValue {
                    field: format!("{}.condition.z", prefix),
                    message: "must be finite".to_string(),
                })
            }
            Condition::ValueAtLeast { value, .. } | Condition::ValueAtMost { value, .. }
                if !value.is_finite() =>
            {
                Err(ValidationError::InvalidValue {
                    field: format!("{}.condition.value", prefix),
                    message: "must be finite".to_string(),
                })
            }
            _ => Ok(()),
        };
    });
    result
}

fn validate_template(prefix: &str, template: &str) -> ValidationResult<()> {
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            return Err(ValidationError::InvalidValue {
                field: format!("{}.recommended_actions", prefix),
                message: format!("unterminated placeholder in '{}'", template),
            });
        };
        let name = &after[..close];
        if !ACTION_PLACEHOLDERS.contains(&name) {
            return Err(ValidationError::InvalidValue {
                field: format!("{}.recommended_actions", prefix),
                message: format!("unknown placeholder '{{{}}}'", name),
            });
        }
        rest = &after[close + 1..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{MetricRef, Severity};
    use opp_common::EntityType;

    fn rule(id: &str) -> RuleSpec {
        RuleSpec {
            id: id.to_string(),
            title: "t".to_string(),
            description: None,
            category: "content_performance".to_string(),
            opportunity_type: "content_decay".to_string(),
            applicable_entity_types: vec![EntityType::Page],
            metrics: vec![MetricRef::new("sessions")],
            baseline: Default::default(),
            condition: Condition::DeviationAtMost {
                metric: None,
                pct: -0.2,
            },
            evidence: vec![],
            base_confidence: 0.6,
            severity: Severity::Standard,
            traffic_metric: None,
            recommended_actions: vec!["Refresh {entity_id}".to_string()],
            enabled: true,
        }
    }

    #[test]
    fn default_policy_is_valid() {
        assert!(validate_policy(&ScoringPolicy::default()).is_ok());
    }

    #[test]
    fn weights_must_sum_to_one() {
        let mut policy = ScoringPolicy::default();
        policy.impact.traffic_weight = 0.9;
        assert!(matches!(
            validate_policy(&policy),
            Err(ValidationError::SemanticError(_))
        ));
    }

    #[test]
    fn short_lookback_rejected() {
        let mut policy = ScoringPolicy::default();
        policy.engine.lookback = 1;
        let err = validate_policy(&policy).unwrap_err();
        assert_eq!(err.code(), 115);
    }

    #[test]
    fn history_days_bounded() {
        let mut policy = ScoringPolicy::default();
        policy.engine.history_days = 1_000_000_000_000;
        let err = validate_policy(&policy).unwrap_err();
        assert!(err.to_string().contains("engine.history_days"));

        policy.engine.history_days = MAX_HISTORY_DAYS;
        assert!(validate_policy(&policy).is_ok());
        policy.engine.history_days = 0;
        assert!(validate_policy(&policy).is_err());
    }

    #[test]
    fn single_prior_year_rejected() {
        let mut policy = ScoringPolicy::default();
        policy.engine.min_prior_years = 1;
        let err = validate_policy(&policy).unwrap_err();
        assert!(err.to_string().contains("engine.min_prior_years"));
        policy.engine.min_prior_years = 2;
        assert!(validate_policy(&policy).is_ok());
    }

    #[test]
    fn duplicate_rule_ids_rejected() {
        let catalog = RuleCatalog {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            catalog_id: None,
            rules: vec![rule("a"), rule("a")],
        };
        assert!(matches!(
            validate_catalog(&catalog),
            Err(ValidationError::SemanticError(_))
        ));
    }

    #[test]
    fn undeclared_condition_metric_rejected() {
        let mut r = rule("a");
        r.condition = Condition::ValueAtMost {
            metric: Some("conversions".to_string()),
            value: 0.0,
        };
        assert!(validate_rule(&r).is_err());
        r.metrics.push(MetricRef::optional_baseline("conversions"));
        assert!(validate_rule(&r).is_ok());
    }

    #[test]
    fn unknown_placeholder_rejected() {
        let mut r = rule("a");
        r.recommended_actions = vec!["Fix {nope}".to_string()];
        assert!(validate_rule(&r).is_err());
        r.recommended_actions = vec!["Fix {entity_id".to_string()];
        assert!(validate_rule(&r).is_err());
    }

    #[test]
    fn empty_group_rejected() {
        let mut r = rule("a");
        r.condition = Condition::Any { conditions: vec![] };
        assert!(validate_rule(&r).is_err());
    }

    #[test]
    fn version_mismatch_reported() {
        let catalog = RuleCatalog {
            schema_version: "0.9.0".to_string(),
            catalog_id: None,
            rules: vec![],
        };
        assert!(matches!(
            validate_catalog(&catalog),
            Err(ValidationError::VersionMismatch { .. })
        ));
    }
}
