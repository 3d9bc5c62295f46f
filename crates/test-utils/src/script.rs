//! Shell scripts that speak the run protocol, for end-to-end supervisor tests.
//!
//! Scripts are run as `/bin/sh <script>` so the file itself never needs the
//! executable bit. Every script starts by reading the run command from stdin.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use taskvisor::exec::Supervisor;

pub const SHELL: &str = "/bin/sh";

/// Temporary directory holding scripts and the files they write.
pub struct ScriptDir {
    dir: TempDir,
}

impl ScriptDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create script dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Lines written to `name` so far (0 if the file does not exist).
    pub fn line_count(&self, name: &str) -> usize {
        fs::read_to_string(self.file(name))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.file(name)).unwrap_or_default()
    }
}

impl Default for ScriptDir {
    fn default() -> Self {
        Self::new()
    }
}

/// A written script.
#[derive(Debug, Clone)]
pub struct ProtocolScript {
    path: PathBuf,
}

impl ProtocolScript {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn program(&self) -> PathBuf {
        PathBuf::from(SHELL)
    }

    pub fn args(&self) -> Vec<String> {
        vec![self.path.display().to_string()]
    }

    pub fn supervisor(&self, grace: Duration) -> Supervisor {
        Supervisor::new(self.program(), self.args(), grace)
    }
}

/// Builder for protocol scripts.
///
/// ```ignore
/// let script = ScriptBuilder::new()
///     .emit(r#"{"event":"run_started"}"#)
///     .emit(r#"{"event":"run_completed"}"#)
///     .write(&dir, "ok.sh");
/// ```
pub struct ScriptBuilder {
    lines: Vec<String>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self {
            lines: vec!["read -r line".to_string()],
        }
    }

    /// Save the received run command to `path`.
    pub fn save_command(mut self, path: &Path) -> Self {
        self.lines
            .push(format!("printf '%s\\n' \"$line\" > '{}'", path.display()));
        self
    }

    /// Print one stdout line. `line` must not contain single quotes.
    pub fn emit(mut self, line: &str) -> Self {
        self.lines.push(format!("printf '%s\\n' '{line}'"));
        self
    }

    /// Print raw text to stdout without a trailing newline.
    pub fn emit_raw(mut self, text: &str) -> Self {
        self.lines.push(format!("printf '%s' '{text}'"));
        self
    }

    pub fn stderr(mut self, line: &str) -> Self {
        self.lines.push(format!("printf '%s\\n' '{line}' >&2"));
        self
    }

    pub fn sleep(mut self, duration: Duration) -> Self {
        self.lines
            .push(format!("sleep {:.3}", duration.as_secs_f64()));
        self
    }

    /// Append a line to `log` on SIGTERM, then exit 143.
    pub fn trap_term(mut self, log: &Path) -> Self {
        self.lines.push(format!(
            "trap 'echo TERM >> \"{}\"; kill $child 2>/dev/null; exit 143' TERM",
            log.display()
        ));
        self
    }

    /// Idle in an interruptible way, so a trap set with `trap_term` runs.
    pub fn idle(mut self) -> Self {
        self.lines.push("sleep 30 & child=$!".to_string());
        self.lines.push("wait $child".to_string());
        self
    }

    /// Replace the shell with a long sleep; dies on the first SIGTERM.
    pub fn exec_sleep(mut self) -> Self {
        self.lines.push("exec sleep 30".to_string());
        self
    }

    /// Any other shell line.
    pub fn line(mut self, raw: &str) -> Self {
        self.lines.push(raw.to_string());
        self
    }

    pub fn exit(mut self, code: i32) -> Self {
        self.lines.push(format!("exit {code}"));
        self
    }

    pub fn write(self, dir: &ScriptDir, name: &str) -> ProtocolScript {
        let path = dir.file(name);
        let mut body = String::from("#!/bin/sh\n");
        for line in self.lines {
            body.push_str(&line);
            body.push('\n');
        }
        fs::write(&path, body).expect("write script");
        ProtocolScript { path }
    }
}

impl Default for ScriptBuilder {
    fn default() -> Self {
        Self::new()
    }
}
