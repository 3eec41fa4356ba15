//! Event vocabulary: stable event names, pipeline stages and the JSONL record.
//!
//! Every event carries the run id and the pipeline stage; pair-level events
//! also carry the entity and rule they concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup and configuration.
    Init,
    /// Metric rows and peer cohorts.
    Load,
    /// Baselines, trends and rule evaluation.
    Detect,
    Score,
    Dedup,
    /// Report output and sink writes.
    Emit,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Init,
        Stage::Load,
        Stage::Detect,
        Stage::Score,
        Stage::Dedup,
        Stage::Emit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Load => "load",
            Stage::Detect => "detect",
            Stage::Score => "score",
            Stage::Dedup => "dedup",
            Stage::Emit => "emit",
        }
    }

    /// Inverse of [`Stage::as_str`].
    pub fn parse(s: &str) -> Option<Stage> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == s)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event names, used as tracing targets.
pub mod event_names {
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";
    pub const CONFIG_ERROR: &str = "config.error";

    pub const LOAD_ROWS: &str = "load.rows";
    pub const LOAD_PEERS: &str = "load.peers";

    pub const DETECT_BATCH_STARTED: &str = "detect.batch_started";
    pub const DETECT_BATCH_DONE: &str = "detect.batch_done";
    pub const DETECT_FIRED: &str = "detect.fired";
    pub const DETECT_DECLINED: &str = "detect.declined";
    pub const DETECT_PAIR_SKIPPED: &str = "detect.pair_skipped";
    pub const DETECT_CANCELLED: &str = "detect.cancelled";

    pub const DEDUP_DROPPED: &str = "dedup.dropped";

    pub const SINK_WRITTEN: &str = "sink.written";
    pub const SINK_RETRY: &str = "sink.retry";
    pub const SINK_FAILED: &str = "sink.failed";

    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// One JSONL log line as written by [`super::JsonlLayer`].
///
/// `run_id`, `stage`, `entity_id` and `rule_id` come from the event itself or,
/// failing that, from the innermost enclosing span that sets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub ts: DateTime<Utc>,
    pub level: Level,
    /// Event name, e.g. `detect.pair_skipped`.
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// Remaining event fields, keyed by field name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl LogEvent {
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"serialization_failed","event":"{}"}}"#,
                self.event
            )
        })
    }
}

/// Carries the run id into every `log_event!` call.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub run_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_omits_absent_context() {
        let event = LogEvent {
            ts: Utc::now(),
            level: Level::Info,
            event: event_names::RUN_STARTED.to_string(),
            run_id: Some("run-abc".to_string()),
            stage: Some(Stage::Init),
            message: Some("start".to_string()),
            entity_id: None,
            rule_id: None,
            fields: BTreeMap::new(),
        };
        let json = event.to_jsonl();
        assert!(json.contains(r#""stage":"init""#));
        assert!(!json.contains("entity_id"));
        assert!(!json.contains("fields"));

        let back: LogEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event, "run.started");
        assert_eq!(back.stage, Some(Stage::Init));
    }

    #[test]
    fn stage_names_round_trip() {
        for stage in Stage::ALL {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage));
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::parse("ingest"), None);
    }

    #[test]
    fn event_names_are_dotted_and_unique() {
        let names = [
            event_names::RUN_STARTED,
            event_names::RUN_FINISHED,
            event_names::CONFIG_LOADED,
            event_names::LOAD_ROWS,
            event_names::DETECT_PAIR_SKIPPED,
            event_names::DEDUP_DROPPED,
            event_names::SINK_RETRY,
        ];
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        assert!(names.iter().all(|n| n.contains('.')));
    }
}
