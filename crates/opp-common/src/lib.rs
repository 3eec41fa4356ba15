//! Opportunity Scan common types, IDs, and errors.
//!
//! This crate provides foundational types shared across the workspace:
//! - Entity identity and entity types
//! - Stable opportunity IDs and run IDs
//! - The unified error taxonomy
//! - Output formats
//! - Trend-pattern labels

pub mod entity;
pub mod error;
pub mod id;
pub mod output;
pub mod trend;

pub use entity::{Entity, EntityType};
pub use error::{Error, ErrorCategory, Result};
pub use id::{EntityId, OpportunityId, RuleId, RunId};
pub use output::OutputFormat;
pub use trend::TrendPattern;

/// Schema version stamped on every serialized run report.
pub const SCHEMA_VERSION: &str = "1.0.0";
