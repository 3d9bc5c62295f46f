#![allow(dead_code)]

use std::path::{Path, PathBuf};

use taskvisor::config::{ConfigFile, RawConfigFile};
use taskvisor::queue::{Job, JobOptions, JobPayload};
use taskvisor::types::PermissionMode;

use crate::script::ProtocolScript;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn executable(mut self, program: impl Into<PathBuf>) -> Self {
        self.config.worker.executable = program.into();
        self
    }

    /// Run `script` through `/bin/sh`.
    pub fn script(mut self, script: &ProtocolScript) -> Self {
        self.config.worker.executable = script.program();
        self.config.worker.args = script.args();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.worker.concurrency = n;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.worker.default_timeout_ms = ms;
        self
    }

    pub fn grace_ms(mut self, ms: u64) -> Self {
        self.config.worker.shutdown_grace_ms = ms;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.queue.max_attempts = n;
        self
    }

    pub fn poll_backoff_ms(mut self, ms: u64) -> Self {
        self.config.queue.poll_backoff_ms = ms;
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobPayload`.
pub struct PayloadBuilder {
    payload: JobPayload,
}

impl PayloadBuilder {
    pub fn new(instruction: &str) -> Self {
        Self {
            payload: JobPayload {
                instruction: instruction.to_string(),
                working_directory: std::env::temp_dir(),
                options: JobOptions::default(),
            },
        }
    }

    pub fn cwd(mut self, dir: &Path) -> Self {
        self.payload.working_directory = dir.to_path_buf();
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.payload.options.timeout_ms = Some(ms);
        self
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.payload.options.session_id = Some(session_id.to_string());
        self
    }

    pub fn resume_last_session(mut self) -> Self {
        self.payload.options.resume_last_session = true;
        self
    }

    pub fn permission_mode(mut self, mode: PermissionMode) -> Self {
        self.payload.options.permission_mode = Some(mode);
        self
    }

    pub fn build(self) -> JobPayload {
        self.payload
    }

    /// Wrap the payload in a job with a fixed id.
    pub fn job(self, id: &str) -> Job {
        Job {
            id: id.to_string(),
            payload: self.payload,
            attempts_made: 0,
        }
    }
}
