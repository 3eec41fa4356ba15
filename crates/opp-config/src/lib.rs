//! Opportunity Scan configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for policy.json (scoring + engine settings) and rules.json
//! - The builtin representative rule catalog
//! - Config resolution (CLI → env → XDG → /etc → builtin)
//! - Semantic validation
//! - Scoring presets
//! - Config snapshots for run reports

pub mod catalog;
pub mod policy;
pub mod preset;
pub mod resolve;
pub mod rules;
pub mod snapshot;
pub mod validate;

pub use policy::{EngineSettings, ScoringPolicy};
pub use preset::{get_preset, PresetName};
pub use resolve::{resolve_config, ConfigPaths, ConfigSource};
pub use rules::{Condition, EvidenceField, MetricRef, RuleCatalog, RuleSpec, Severity, WindowKind};
pub use snapshot::ConfigSnapshot;
pub use validate::{ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
