//! Opportunity sinks and caller-side retry.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;

use crate::logging::{event_names, LogContext, Stage};
use crate::opportunity::Opportunity;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("write to {path} failed: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialize opportunity: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sink rejected batch: {0}")]
    Rejected(String),
}

/// Destination for detected opportunities.
pub trait OpportunitySink: Send + Sync {
    fn write_batch(&self, batch: &[Opportunity]) -> Result<(), SinkError>;
}

/// Collects opportunities in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    written: Mutex<Vec<Opportunity>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> Vec<Opportunity> {
        self.written
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }
}

impl OpportunitySink for MemorySink {
    fn write_batch(&self, batch: &[Opportunity]) -> Result<(), SinkError> {
        let mut written = self
            .written
            .lock()
            .map_err(|_| SinkError::Rejected("memory sink poisoned".to_string()))?;
        written.extend_from_slice(batch);
        Ok(())
    }
}

/// Appends one JSON object per opportunity to a file.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    // Serializes appends from concurrent writers.
    lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl OpportunitySink for JsonlSink {
    fn write_batch(&self, batch: &[Opportunity]) -> Result<(), SinkError> {
        // Render the whole batch first so a serialization error writes nothing.
        let mut buf = Vec::new();
        for opp in batch {
            serde_json::to_writer(&mut buf, opp)?;
            buf.push(b'\n');
        }

        let _guard = self
            .lock
            .lock()
            .map_err(|_| SinkError::Rejected("jsonl sink poisoned".to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        file.write_all(&buf).map_err(|e| self.io_err(e))?;
        file.flush().map_err(|e| self.io_err(e))
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1,
        }
    }

    /// Delay before attempt `attempt` (1-based; the first attempt has none).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let mut delay = self.initial_backoff;
        for _ in 2..attempt {
            delay = delay.saturating_mul(self.multiplier).min(self.max_backoff);
        }
        delay.min(self.max_backoff)
    }
}

/// Write `batch`, retrying failed attempts with backoff.
///
/// Returns `SinkWriteFailure` once every attempt has failed.
pub fn write_with_retry(
    sink: &dyn OpportunitySink,
    batch: &[Opportunity],
    policy: &RetryPolicy,
    ctx: &LogContext,
) -> Result<u32, opp_common::Error> {
    let attempts = policy.max_attempts.max(1);
    let mut last_err = String::new();

    for attempt in 1..=attempts {
        let delay = policy.backoff_for(attempt);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        match sink.write_batch(batch) {
            Ok(()) => {
                crate::log_event!(
                    ctx,
                    INFO,
                    event_names::SINK_WRITTEN,
                    Stage::Emit,
                    "opportunities written",
                    count = batch.len() as u64,
                    attempt = attempt
                );
                return Ok(attempt);
            }
            Err(e) => {
                last_err = e.to_string();
                if attempt < attempts {
                    crate::log_event!(
                        ctx,
                        WARN,
                        event_names::SINK_RETRY,
                        Stage::Emit,
                        "sink write failed, retrying",
                        attempt = attempt,
                        error = last_err.as_str()
                    );
                }
            }
        }
    }

    crate::log_event!(
        ctx,
        ERROR,
        event_names::SINK_FAILED,
        Stage::Emit,
        "sink write failed",
        attempts = attempts,
        error = last_err.as_str()
    );
    Err(opp_common::Error::SinkWriteFailure {
        attempts,
        message: last_err,
    })
}
