// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `taskvisor`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskvisor",
    version,
    about = "Run queued jobs through a supervised external program.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Taskvisor.toml` in the current working directory. When that
    /// file does not exist, built-in defaults are used.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// JSON-lines file of jobs to enqueue at startup (`-` for stdin).
    ///
    /// Each line is either a full job (`{"id", "payload", "attemptsMade"}`)
    /// or just a payload (`{"instruction", "workingDirectory", "options"}`).
    #[arg(long, value_name = "PATH")]
    pub jobs: Option<PathBuf>,

    /// Exit once every queued job has reached a final state.
    #[arg(long)]
    pub once: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKVISOR_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate config and jobs, print them, but don't execute.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = CliArgs::try_parse_from([
            "taskvisor",
            "--config",
            "cfg/Taskvisor.toml",
            "--jobs",
            "-",
            "--once",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(args.config, Some(PathBuf::from("cfg/Taskvisor.toml")));
        assert_eq!(args.jobs, Some(PathBuf::from("-")));
        assert!(args.once);
        assert!(!args.dry_run);
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    }
}
