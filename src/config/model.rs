// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::PermissionMode;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [worker]
/// executable = "bin/agent-runner"
/// concurrency = 2
/// default_timeout_ms = 300000
/// shutdown_grace_ms = 5000
/// permission_mode = "bypassPermissions"
///
/// [queue]
/// max_attempts = 3
/// ```
///
/// All sections are optional and have reasonable defaults. This is the
/// unchecked form; convert it with `ConfigFile::try_from`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub queue: QueueSection,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    worker: WorkerSection,
    queue: QueueSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(worker: WorkerSection, queue: QueueSection) -> Self {
        Self { worker, queue }
    }

    pub fn worker(&self) -> &WorkerSection {
        &self.worker
    }

    pub fn queue(&self) -> &QueueSection {
        &self.queue
    }
}

/// `[worker]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    /// Program to launch for each job: a path, or a bare name looked up on
    /// `PATH`.
    #[serde(default = "default_executable")]
    pub executable: PathBuf,

    /// Extra arguments passed to the program before anything else.
    #[serde(default)]
    pub args: Vec<String>,

    /// Maximum number of jobs executing at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-job deadline in milliseconds, unless the job overrides it.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// How long a terminated process gets between SIGTERM and SIGKILL, in
    /// milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    #[serde(default)]
    pub permission_mode: PermissionMode,

    /// Ask the program to exit once its run completes.
    #[serde(default = "default_exit_on_complete")]
    pub exit_on_complete: bool,
}

impl WorkerSection {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_executable() -> PathBuf {
    PathBuf::from("agent-runner")
}

fn default_concurrency() -> usize {
    2
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_exit_on_complete() -> bool {
    true
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            args: Vec::new(),
            concurrency: default_concurrency(),
            default_timeout_ms: default_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            permission_mode: PermissionMode::default(),
            exit_on_complete: default_exit_on_complete(),
        }
    }
}

/// `[queue]` section.
///
/// Scheduling policy belongs to the broker; these knobs only cover what the
/// bundled in-memory queue and the consumer loop need.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    /// Total attempts per job, first run included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before asking the queue again after it returned an error, in
    /// milliseconds.
    #[serde(default = "default_poll_backoff_ms")]
    pub poll_backoff_ms: u64,
}

impl QueueSection {
    pub fn poll_backoff(&self) -> Duration {
        Duration::from_millis(self.poll_backoff_ms)
    }
}

fn default_max_attempts() -> u32 {
    1
}

fn default_poll_backoff_ms() -> u64 {
    1_000
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            poll_backoff_ms: default_poll_backoff_ms(),
        }
    }
}
