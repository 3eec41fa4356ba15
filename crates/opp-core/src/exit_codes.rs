//! Exit codes for the opp-core CLI.
//!
//! Ranges:
//! - 0-9: operational outcomes (parse the outcome from the code, not output)
//! - 10-19: user/environment errors
//! - 20-29: internal errors

/// Process exit codes. Stable contract for schedulers and scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Run completed, nothing detected.
    Clean = 0,

    /// Run completed with at least one opportunity.
    OpportunitiesFound = 1,

    /// Run completed but some (entity, rule) pairs were skipped, or the sink
    /// gave up after retries.
    PartialFail = 3,

    /// Cancelled (timeout or signal) after some batches; results are partial.
    Cancelled = 6,

    /// Invalid arguments.
    ArgsError = 10,

    /// Policy or rule catalog failed to load or validate.
    ConfigError = 11,

    /// Internal error (bug).
    InternalError = 20,

    /// I/O error reading metrics or writing output.
    IoError = 21,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Codes 0 and 1.
    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Clean | ExitCode::OpportunitiesFound)
    }

    /// Codes below 10 describe the outcome of a completed or cancelled run.
    pub fn is_operational(self) -> bool {
        (self as i32) < 10
    }

    pub fn is_user_error(self) -> bool {
        (10..20).contains(&(self as i32))
    }

    pub fn is_internal_error(self) -> bool {
        (self as i32) >= 20
    }

    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Name used in JSON error output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::OpportunitiesFound => "OK_OPPORTUNITIES",
            ExitCode::PartialFail => "ERR_PARTIAL",
            ExitCode::Cancelled => "ERR_CANCELLED",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }

    /// Exit code for a top-level error.
    pub fn for_error(err: &opp_common::Error) -> Self {
        use opp_common::ErrorCategory;
        match err.category() {
            ErrorCategory::Config => ExitCode::ConfigError,
            ErrorCategory::Io | ErrorCategory::Source | ErrorCategory::Sink => ExitCode::IoError,
            ErrorCategory::Detection => ExitCode::InternalError,
        }
    }

    /// Exit code for a finished scan. Cancellation outranks skips, skips
    /// outrank findings.
    pub fn for_report(report: &crate::engine::RunReport, sink_failed: bool) -> Self {
        if report.cancelled {
            ExitCode::Cancelled
        } else if sink_failed || report.skipped_total() > 0 {
            ExitCode::PartialFail
        } else if !report.opportunities.is_empty() {
            ExitCode::OpportunitiesFound
        } else {
            ExitCode::Clean
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ExitCode::Clean.as_i32(), 0);
        assert_eq!(ExitCode::OpportunitiesFound.as_i32(), 1);
        assert_eq!(ExitCode::PartialFail.as_i32(), 3);
        assert_eq!(ExitCode::Cancelled.as_i32(), 6);
        assert_eq!(ExitCode::ArgsError.as_i32(), 10);
        assert_eq!(ExitCode::ConfigError.as_i32(), 11);
        assert_eq!(ExitCode::InternalError.as_i32(), 20);
        assert_eq!(ExitCode::IoError.as_i32(), 21);
    }

    #[test]
    fn classification() {
        assert!(ExitCode::OpportunitiesFound.is_success());
        assert!(!ExitCode::PartialFail.is_success());
        assert!(ExitCode::Cancelled.is_operational());
        assert!(ExitCode::ConfigError.is_user_error());
        assert!(ExitCode::IoError.is_internal_error());
        assert!(!ExitCode::Clean.is_error());
    }

    #[test]
    fn error_mapping() {
        let err = opp_common::Error::InvalidRules("dup".into());
        assert_eq!(ExitCode::for_error(&err), ExitCode::ConfigError);
        let err = opp_common::Error::Source("gone".into());
        assert_eq!(ExitCode::for_error(&err), ExitCode::IoError);
    }

    #[test]
    fn report_outcomes() {
        let mut report: crate::engine::RunReport = serde_json::from_value(serde_json::json!({
            "run_id": "run-000000000000",
            "schema_version": "1.0.0",
            "period": {"start": "2026-04-01", "end": "2026-04-30"},
            "detected_at": "2026-05-01T00:00:00Z",
            "opportunities": [],
            "evaluated": 0,
            "fired": 0,
            "declined": {},
            "skipped": {},
            "deduplicated": 0,
            "cancelled": false,
            "batches_completed": 0,
            "batches_total": 0
        }))
        .unwrap();
        assert_eq!(ExitCode::for_report(&report, false), ExitCode::Clean);
        assert_eq!(ExitCode::for_report(&report, true), ExitCode::PartialFail);

        report.skipped.insert("panic".to_string(), 1);
        assert_eq!(ExitCode::for_report(&report, false), ExitCode::PartialFail);

        report.cancelled = true;
        assert_eq!(ExitCode::for_report(&report, false), ExitCode::Cancelled);
    }

    #[test]
    fn display() {
        assert_eq!(ExitCode::Cancelled.to_string(), "ERR_CANCELLED (6)");
    }
}
