// src/exec/request.rs

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::config::WorkerSection;
use crate::protocol::{RunCommand, RunCommandOptions};
use crate::queue::{Job, JobId};
use crate::types::PermissionMode;

/// Worker-wide defaults a job may override.
#[derive(Debug, Clone)]
pub struct ExecutionDefaults {
    pub timeout: Duration,
    pub permission_mode: PermissionMode,
    pub exit_on_complete: bool,
}

impl ExecutionDefaults {
    pub fn from_config(worker: &WorkerSection) -> Self {
        Self {
            timeout: worker.default_timeout(),
            permission_mode: worker.permission_mode,
            exit_on_complete: worker.exit_on_complete,
        }
    }
}

impl Default for ExecutionDefaults {
    fn default() -> Self {
        Self::from_config(&WorkerSection::default())
    }
}

/// Everything needed to run one job once.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub job_id: JobId,
    /// Fresh per attempt; sent to the program as `run_id`.
    pub run_id: String,
    pub instruction: String,
    pub working_directory: PathBuf,
    pub session_id: Option<String>,
    pub resume_last_session: bool,
    pub exit_on_complete: bool,
    pub permission_mode: PermissionMode,
    pub timeout: Duration,
}

impl ExecutionRequest {
    pub fn from_job(job: &Job, defaults: &ExecutionDefaults) -> Self {
        let options = &job.payload.options;
        Self {
            job_id: job.id.clone(),
            run_id: Uuid::new_v4().to_string(),
            instruction: job.payload.instruction.clone(),
            working_directory: job.payload.working_directory.clone(),
            session_id: options.session_id.clone(),
            resume_last_session: options.resume_last_session,
            exit_on_complete: defaults.exit_on_complete,
            permission_mode: options.permission_mode.unwrap_or(defaults.permission_mode),
            // A zero override would expire before the process starts.
            timeout: options
                .timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
        }
    }

    pub fn to_command(&self) -> RunCommand {
        RunCommand::prompt(
            self.instruction.clone(),
            self.run_id.clone(),
            RunCommandOptions {
                cwd: self.working_directory.clone(),
                session_id: self.session_id.clone(),
                resume_last_session: self.resume_last_session,
                exit_on_complete: self.exit_on_complete,
                permission_mode: self.permission_mode,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobOptions, JobPayload};

    fn job(options: JobOptions) -> Job {
        Job {
            id: "job-1".into(),
            payload: JobPayload {
                instruction: "do it".into(),
                working_directory: PathBuf::from("/tmp"),
                options,
            },
            attempts_made: 0,
        }
    }

    #[test]
    fn job_options_override_defaults() {
        let defaults = ExecutionDefaults::default();
        let req = ExecutionRequest::from_job(
            &job(JobOptions {
                timeout_ms: Some(100),
                permission_mode: Some(PermissionMode::Plan),
                session_id: Some("s".into()),
                resume_last_session: true,
            }),
            &defaults,
        );

        assert_eq!(req.timeout, Duration::from_millis(100));
        assert_eq!(req.permission_mode, PermissionMode::Plan);
        assert_eq!(req.to_command().options.session_id.as_deref(), Some("s"));
    }

    #[test]
    fn zero_timeout_override_falls_back_to_default() {
        let defaults = ExecutionDefaults::default();
        let req = ExecutionRequest::from_job(
            &job(JobOptions {
                timeout_ms: Some(0),
                ..JobOptions::default()
            }),
            &defaults,
        );

        assert_eq!(req.timeout, defaults.timeout);
    }

    #[test]
    fn defaults_apply_and_run_ids_are_fresh() {
        let defaults = ExecutionDefaults::default();
        let a = ExecutionRequest::from_job(&job(JobOptions::default()), &defaults);
        let b = ExecutionRequest::from_job(&job(JobOptions::default()), &defaults);

        assert_eq!(a.timeout, Duration::from_millis(300_000));
        assert_eq!(a.permission_mode, PermissionMode::BypassPermissions);
        assert!(a.exit_on_complete);
        assert_ne!(a.run_id, b.run_id);
    }
}
