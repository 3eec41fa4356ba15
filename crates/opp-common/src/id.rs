//! Entity, rule, opportunity and run identity types.
//!
//! An opportunity is identified by a stable hash over the tuple
//! (entity_id, rule_id, period), so re-running detection over the same data
//! yields the same IDs and downstream stores can upsert on them.

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifier of a tracked entity (page path, campaign id, keyword, ...).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

/// Identifier of a detection rule.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct RuleId(pub String);

impl RuleId {
    pub fn new(id: impl Into<String>) -> Self {
        RuleId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RuleId {
    fn from(s: &str) -> Self {
        RuleId(s.to_string())
    }
}

/// Stable opportunity identifier.
///
/// Format: `opp-<16 hex chars>` where the hex is the SHA-256 prefix of
/// `entity_id \0 rule_id \0 period_start \0 period_end`.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct OpportunityId(pub String);

impl OpportunityId {
    /// Derive the ID for a firing. Pure: same inputs, same ID.
    pub fn derive(
        entity_id: &EntityId,
        rule_id: &RuleId,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(entity_id.0.as_bytes());
        hasher.update([0u8]);
        hasher.update(rule_id.0.as_bytes());
        hasher.update([0u8]);
        hasher.update(period_start.format("%Y-%m-%d").to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(period_end.format("%Y-%m-%d").to_string().as_bytes());
        let digest = hex::encode(hasher.finalize());
        OpportunityId(format!("opp-{}", &digest[..16]))
    }

    /// Parse and validate an existing opportunity ID string.
    pub fn parse(s: &str) -> Option<Self> {
        let hex_part = s.strip_prefix("opp-")?;
        if hex_part.len() != 16 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(OpportunityId(s.to_string()))
    }
}

impl fmt::Display for OpportunityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single detection run, used for log correlation.
///
/// Format: `run-<12 hex chars>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a fresh run ID.
    pub fn new() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        RunId(format!("run-{}", &uuid[..12]))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn opportunity_id_is_stable() {
        let e = EntityId::from("page_42");
        let r = RuleId::from("content_decay");
        let a = OpportunityId::derive(&e, &r, d(2026, 4, 1), d(2026, 4, 30));
        let b = OpportunityId::derive(&e, &r, d(2026, 4, 1), d(2026, 4, 30));
        assert_eq!(a, b);
        assert!(a.0.starts_with("opp-"));
        assert_eq!(a.0.len(), 20);
        assert!(OpportunityId::parse(&a.0).is_some());
    }

    #[test]
    fn opportunity_id_varies_by_component() {
        let e = EntityId::from("page_42");
        let r = RuleId::from("content_decay");
        let base = OpportunityId::derive(&e, &r, d(2026, 4, 1), d(2026, 4, 30));
        let other_rule =
            OpportunityId::derive(&e, &RuleId::from("ctr_drop"), d(2026, 4, 1), d(2026, 4, 30));
        let other_period = OpportunityId::derive(&e, &r, d(2026, 5, 1), d(2026, 5, 31));
        assert_ne!(base, other_rule);
        assert_ne!(base, other_period);
    }

    #[test]
    fn separator_prevents_concatenation_collisions() {
        let a = OpportunityId::derive(
            &EntityId::from("ab"),
            &RuleId::from("c"),
            d(2026, 1, 1),
            d(2026, 1, 31),
        );
        let b = OpportunityId::derive(
            &EntityId::from("a"),
            &RuleId::from("bc"),
            d(2026, 1, 1),
            d(2026, 1, 31),
        );
        assert_ne!(a, b);
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(OpportunityId::parse("opp-xyz").is_none());
        assert!(OpportunityId::parse("pt-0123456789abcdef").is_none());
        assert!(OpportunityId::parse("opp-0123456789abcdeg").is_none());
    }

    #[test]
    fn run_id_format() {
        let id = RunId::new();
        assert!(id.0.starts_with("run-"));
        assert_eq!(id.0.len(), 16);
        assert_ne!(id, RunId::new());
    }
}
