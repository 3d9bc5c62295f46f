// src/protocol/command.rs

use std::path::PathBuf;

use serde::Serialize;

use crate::types::PermissionMode;

/// The one command written to the program's stdin at the start of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunCommand {
    pub action: &'static str,
    pub prompt: String,
    pub run_id: String,
    pub options: RunCommandOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunCommandOptions {
    pub cwd: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub resume_last_session: bool,
    pub exit_on_complete: bool,
    pub permission_mode: PermissionMode,
}

impl RunCommand {
    pub fn prompt(prompt: impl Into<String>, run_id: impl Into<String>, options: RunCommandOptions) -> Self {
        Self {
            action: "prompt",
            prompt: prompt.into(),
            run_id: run_id.into(),
            options,
        }
    }

    /// Encode as a single newline-terminated JSON line.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
