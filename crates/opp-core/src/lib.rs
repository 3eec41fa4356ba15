//! Opportunity Scan Core Library
//!
//! Detection and scoring of marketing opportunities from periodic metrics:
//! - Metric series, baselines and trend classification
//! - Declarative and custom rule evaluation
//! - Confidence, impact, urgency and priority scoring
//! - The batched, cancellable detection engine
//! - Configuration loading, structured logging and exit codes
//!
//! The binary entry point is in `main.rs`.

pub mod baseline;
pub mod config;
pub mod engine;
pub mod exit_codes;
pub mod logging;
pub mod opportunity;
pub mod output;
pub mod rule;
pub mod scorer;
pub mod series;
pub mod sink;
pub mod source;
pub mod trend;

pub use baseline::{Baseline, BaselineRequest, UndefinedBaseline};
pub use engine::{CancellationToken, DetectionEngine, RunOptions, RunReport};
pub use opportunity::{Opportunity, OpportunityStatus};
pub use rule::{DeclineReason, Evaluation, EvaluationInputs, Firing, MetricView, Rule, RulePredicate};
pub use scorer::{OpportunityScorer, Priority, Scores};
pub use series::{Granularity, MetricObservation, MetricSeries};
pub use sink::{JsonlSink, MemorySink, OpportunitySink, RetryPolicy};
pub use source::{DateRange, MemoryMetricSource, MetricRow, MetricSource};
pub use trend::Trend;
