//! Tracked entity taxonomy.

use crate::id::EntityId;
use clap::ValueEnum;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of tracked object. Cohort comparisons never cross entity types.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    ValueEnum,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Landing or content page.
    Page,
    /// Paid advertising campaign.
    Campaign,
    /// Search keyword (paid or organic).
    Keyword,
    /// Email send or email flow.
    Email,
    /// Site- or account-level rollup (revenue, total traffic).
    Aggregate,
}

impl EntityType {
    /// All entity types in a stable order.
    pub fn all() -> &'static [EntityType] {
        &[
            EntityType::Page,
            EntityType::Campaign,
            EntityType::Keyword,
            EntityType::Email,
            EntityType::Aggregate,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Page => "page",
            EntityType::Campaign => "campaign",
            EntityType::Keyword => "keyword",
            EntityType::Email => "email",
            EntityType::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "page" => Ok(EntityType::Page),
            "campaign" => Ok(EntityType::Campaign),
            "keyword" => Ok(EntityType::Keyword),
            "email" => Ok(EntityType::Email),
            "aggregate" => Ok(EntityType::Aggregate),
            _ => Err(format!("unknown entity type: {}", s)),
        }
    }
}

/// A tracked entity: stable identifier plus type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Entity {
    pub id: EntityId,
    pub entity_type: EntityType,
}

impl Entity {
    pub fn new(id: impl Into<String>, entity_type: EntityType) -> Self {
        Entity {
            id: EntityId(id.into()),
            entity_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_round_trips_through_str() {
        for t in EntityType::all() {
            assert_eq!(t.as_str().parse::<EntityType>().unwrap(), *t);
        }
        assert!("widget".parse::<EntityType>().is_err());
    }

    #[test]
    fn entity_type_serializes_snake_case() {
        let json = serde_json::to_string(&EntityType::Aggregate).unwrap();
        assert_eq!(json, r#""aggregate""#);
    }
}
