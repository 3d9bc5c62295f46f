// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, TaskvisorError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::TaskvisorError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.worker, raw.queue))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_executable(cfg)?;
    validate_worker_limits(cfg)?;
    validate_queue(cfg)?;
    Ok(())
}

fn validate_executable(cfg: &RawConfigFile) -> Result<()> {
    // Existence is checked per job, right before spawning; a missing binary
    // fails that job, not the whole worker.
    if cfg.worker.executable.as_os_str().is_empty() {
        return Err(TaskvisorError::ConfigError(
            "[worker].executable must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_worker_limits(cfg: &RawConfigFile) -> Result<()> {
    if cfg.worker.concurrency == 0 {
        return Err(TaskvisorError::ConfigError(
            "[worker].concurrency must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.worker.default_timeout_ms == 0 {
        return Err(TaskvisorError::ConfigError(
            "[worker].default_timeout_ms must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_queue(cfg: &RawConfigFile) -> Result<()> {
    if cfg.queue.max_attempts == 0 {
        return Err(TaskvisorError::ConfigError(
            "[queue].max_attempts must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ConfigFile::try_from(RawConfigFile::default()).unwrap();
        assert_eq!(cfg.worker().concurrency, 2);
        assert_eq!(cfg.worker().default_timeout_ms, 300_000);
        assert_eq!(cfg.queue().max_attempts, 1);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut raw = RawConfigFile::default();
        raw.worker.concurrency = 0;

        match ConfigFile::try_from(raw) {
            Err(TaskvisorError::ConfigError(msg)) => assert!(msg.contains("concurrency")),
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    #[test]
    fn parses_permission_mode_from_toml() {
        let raw: RawConfigFile = toml::from_str(
            r#"
[worker]
executable = "/usr/local/bin/agent"
permission_mode = "plan"
"#,
        )
        .unwrap();
        let cfg = ConfigFile::try_from(raw).unwrap();
        assert_eq!(
            cfg.worker().permission_mode,
            crate::types::PermissionMode::Plan
        );
    }
}
