// src/exec/executable.rs

//! Resolution of the configured program before anything is spawned.

use std::path::{Path, PathBuf};

use crate::errors::JobError;

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && (m.permissions().mode() & 0o111 != 0))
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file())
        .unwrap_or(false)
}

fn has_separator(program: &Path) -> bool {
    program.components().count() > 1
}

/// Find an executable named `name` in one of `dirs`.
pub fn find_in_dirs(name: &Path, dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// Resolve `program` to an executable file.
///
/// Paths (anything with a separator) are checked as given; bare names are
/// searched on `PATH`. A missing or non-executable program is a
/// [`JobError::Configuration`].
pub fn resolve_executable(program: &Path) -> Result<PathBuf, JobError> {
    if program.as_os_str().is_empty() {
        return Err(JobError::Configuration(
            "no executable configured".to_string(),
        ));
    }

    if has_separator(program) {
        if !program.exists() {
            return Err(JobError::Configuration(format!(
                "executable {} does not exist",
                program.display()
            )));
        }
        if !is_executable(program) {
            return Err(JobError::Configuration(format!(
                "{} is not an executable file",
                program.display()
            )));
        }
        return Ok(program.to_path_buf());
    }

    let dirs = std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect::<Vec<_>>())
        .unwrap_or_default();

    find_in_dirs(program, &dirs).ok_or_else(|| {
        JobError::Configuration(format!(
            "executable {} not found on PATH",
            program.display()
        ))
    })
}
