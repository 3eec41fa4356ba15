//! Error types for Opportunity Scan.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for automation
//! - Remediation suggestions for humans
//!
//! Errors raised inside a single (entity, rule) evaluation are never fatal to
//! a run; the engine records them as skipped evaluations. The taxonomy here
//! is what surfaces in run reports and CLI output:
//!
//! ```json
//! {
//!   "code": 21,
//!   "category": "detection",
//!   "message": "malformed series for page_42/sessions: duplicate period 2026-03-01",
//!   "recoverable": false
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Opportunity Scan operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Policy, rule catalog, or schema errors.
    Config,
    /// Per-pair detection errors (series, baseline, rule).
    Detection,
    /// Metric source access errors.
    Source,
    /// Opportunity sink errors.
    Sink,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Detection => write!(f, "detection"),
            ErrorCategory::Source => write!(f, "source"),
            ErrorCategory::Sink => write!(f, "sink"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for Opportunity Scan.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid scoring policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid rule catalog: {0}")]
    InvalidRules(String),

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    // Detection errors (20-29)
    #[error("insufficient history for baseline: {0}")]
    UndefinedBaseline(String),

    #[error("malformed series: {0}")]
    MalformedSeries(String),

    #[error("rule {rule_id} failed for {entity_id}: {message}")]
    RuleEvaluation {
        rule_id: String,
        entity_id: String,
        message: String,
    },

    // Source errors (30-39)
    #[error("metric source error: {0}")]
    Source(String),

    // Sink errors (40-49)
    #[error("opportunity sink write failed after {attempts} attempt(s): {message}")]
    SinkWriteFailure { attempts: u32, message: String },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Detection errors
    /// - 30-39: Source errors
    /// - 40-49: Sink errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidPolicy(_) => 11,
            Error::InvalidRules(_) => 12,
            Error::VersionMismatch { .. } => 13,
            Error::UndefinedBaseline(_) => 20,
            Error::MalformedSeries(_) => 21,
            Error::RuleEvaluation { .. } => 22,
            Error::Source(_) => 30,
            Error::SinkWriteFailure { .. } => 40,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_)
            | Error::InvalidPolicy(_)
            | Error::InvalidRules(_)
            | Error::VersionMismatch { .. } => ErrorCategory::Config,

            Error::UndefinedBaseline(_)
            | Error::MalformedSeries(_)
            | Error::RuleEvaluation { .. } => ErrorCategory::Detection,

            Error::Source(_) => ErrorCategory::Source,

            Error::SinkWriteFailure { .. } => ErrorCategory::Sink,

            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether this error is potentially recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) => true,
            Error::InvalidPolicy(_) => true,
            Error::InvalidRules(_) => true,
            Error::VersionMismatch { .. } => true,

            // More history arrives with the next run
            Error::UndefinedBaseline(_) => true,
            // Upstream data must be fixed
            Error::MalformedSeries(_) => false,
            Error::RuleEvaluation { .. } => false,

            Error::Source(_) => true,
            Error::SinkWriteFailure { .. } => true,

            Error::Io(_) => true,
            Error::Json(_) => false,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => "Run 'opp-core check' to validate configuration files.",
            Error::InvalidPolicy(_) => {
                "Fix policy.json or fall back to a preset with '--preset balanced'."
            }
            Error::InvalidRules(_) => {
                "Fix rules.json; every rule needs a unique id and at least one metric."
            }
            Error::VersionMismatch { .. } => {
                "Regenerate the configuration file for the current schema version."
            }
            Error::UndefinedBaseline(_) => {
                "Not enough history yet. The rule will be evaluated once enough periods exist."
            }
            Error::MalformedSeries(_) => {
                "Check the metric export for duplicate or overlapping periods."
            }
            Error::RuleEvaluation { .. } => {
                "Check that the rule references metrics present in the export."
            }
            Error::Source(_) => "Verify the metrics file path and format (JSON array or JSONL).",
            Error::SinkWriteFailure { .. } => {
                "Check disk space and permissions for the output path, then re-run."
            }
            Error::Io(_) => "Check file paths and permissions. Retry the operation.",
            Error::Json(_) => "Invalid JSON. Check syntax with 'jq .' before retrying.",
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::InvalidPolicy(_) => "Invalid Scoring Policy",
            Error::InvalidRules(_) => "Invalid Rule Catalog",
            Error::VersionMismatch { .. } => "Schema Version Mismatch",
            Error::UndefinedBaseline(_) => "Undefined Baseline",
            Error::MalformedSeries(_) => "Malformed Series",
            Error::RuleEvaluation { .. } => "Rule Evaluation Failed",
            Error::Source(_) => "Metric Source Error",
            Error::SinkWriteFailure { .. } => "Sink Write Failed",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Error",
        }
    }

    /// Format for human consumption.
    pub fn format_human(&self) -> String {
        format!(
            "✗ {}\n  Reason: {}\n  Fix: {}",
            self.headline(),
            self,
            self.remediation()
        )
    }

    /// Structured form for JSON output.
    pub fn to_structured(&self) -> StructuredError {
        StructuredError {
            code: self.code(),
            category: self.category(),
            message: self.to_string(),
            recoverable: self.is_recoverable(),
        }
    }
}

/// Machine-readable error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: u32,
    pub category: ErrorCategory,
    pub message: String,
    pub recoverable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_categories() {
        let cases: Vec<(Error, u32, ErrorCategory)> = vec![
            (Error::Config("x".into()), 10, ErrorCategory::Config),
            (
                Error::MalformedSeries("dup".into()),
                21,
                ErrorCategory::Detection,
            ),
            (Error::Source("gone".into()), 30, ErrorCategory::Source),
            (
                Error::SinkWriteFailure {
                    attempts: 3,
                    message: "disk full".into(),
                },
                40,
                ErrorCategory::Sink,
            ),
        ];
        for (err, code, cat) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.category(), cat);
        }
    }

    #[test]
    fn structured_error_serializes() {
        let err = Error::RuleEvaluation {
            rule_id: "cpa_spike".into(),
            entity_id: "cmp_7".into(),
            message: "metric 'cpa' missing".into(),
        };
        let s = err.to_structured();
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains(r#""code":22"#));
        assert!(json.contains(r#""category":"detection""#));
        assert!(json.contains(r#""recoverable":false"#));
    }

    #[test]
    fn human_format_has_fix_line() {
        let err = Error::UndefinedBaseline("1 of 3 periods".into());
        let out = err.format_human();
        assert!(out.contains("Undefined Baseline"));
        assert!(out.contains("Fix:"));
    }
}
