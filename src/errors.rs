// src/errors.rs

//! Crate-wide error types.
//!
//! - [`TaskvisorError`] covers worker-level failures (config, IO, queue).
//! - [`JobError`] is the per-job failure taxonomy. Every variant is caught at
//!   the consumer loop boundary and turned into a [`JobFailure`] for the
//!   queue; none of them ever ends the worker.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskvisorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskvisorError>;

/// Why an in-flight execution was asked to stop from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Explicit cancellation request for this job.
    Cancelled,
    /// The worker is shutting down.
    Shutdown,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Cancelled => f.write_str("cancellation requested"),
            StopReason::Shutdown => f.write_str("worker shutting down"),
        }
    }
}

/// Per-job failure taxonomy.
#[derive(Error, Debug)]
pub enum JobError {
    /// The executable is missing or not executable. Nothing was spawned.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The OS refused to create the process.
    #[error("spawn error: failed to launch {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The deadline elapsed before any terminal protocol event.
    #[error("timeout error: no terminal event after {}ms", .after.as_millis())]
    TimedOut { after: Duration },

    /// The job was stopped from the outside.
    #[error("cancelled: {0}")]
    Cancelled(StopReason),

    /// Non-zero exit, signal, or a broken stdin pipe without a prior
    /// terminal event.
    #[error("process error: {0}")]
    Process(String),

    /// The external program reported `run_failed`.
    #[error("run failed: {0}")]
    RunFailed(String),

    /// Another execution is already registered under this job id.
    #[error("job {0} is already running on this worker")]
    AlreadyRunning(String),
}

/// Coarse failure category visible to queue consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Spawn,
    Timeout,
    Cancelled,
    Process,
}

impl JobError {
    pub fn kind(&self) -> FailureKind {
        match self {
            JobError::Configuration(_) => FailureKind::Configuration,
            JobError::Spawn { .. } => FailureKind::Spawn,
            JobError::TimedOut { .. } => FailureKind::Timeout,
            JobError::Cancelled(_) => FailureKind::Cancelled,
            JobError::Process(_) | JobError::RunFailed(_) | JobError::AlreadyRunning(_) => {
                FailureKind::Process
            }
        }
    }

    /// Whether the queue may hand this job out again.
    ///
    /// Configuration errors and explicit cancellations are final; a job
    /// interrupted by shutdown is not the job's fault and may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Configuration(_) | JobError::AlreadyRunning(_) => false,
            JobError::Cancelled(reason) => *reason == StopReason::Shutdown,
            _ => true,
        }
    }
}

/// What the queue receives for a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&JobError> for JobFailure {
    fn from(err: &JobError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_messages_name_their_cause() {
        let timeout = JobError::TimedOut {
            after: Duration::from_millis(100),
        };
        assert_eq!(
            timeout.to_string(),
            "timeout error: no terminal event after 100ms"
        );

        let cancelled = JobFailure::from(&JobError::Cancelled(StopReason::Cancelled));
        assert_eq!(cancelled.kind, FailureKind::Cancelled);
        assert!(!cancelled.retryable);
        assert!(cancelled.message.starts_with("cancelled"));

        let shutdown = JobFailure::from(&JobError::Cancelled(StopReason::Shutdown));
        assert!(shutdown.retryable);
    }

    #[test]
    fn configuration_errors_are_final() {
        let err = JobError::Configuration("missing binary".into());
        assert_eq!(err.kind(), FailureKind::Configuration);
        assert!(!err.is_retryable());
    }
}
