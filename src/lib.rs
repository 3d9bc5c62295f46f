// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod progress;
pub mod protocol;
pub mod queue;
pub mod types;

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::default_config_path;
use crate::config::{ConfigFile, RawConfigFile, load_and_validate};
use crate::engine::Worker;
use crate::exec::{ExecutionBackend, Supervisor};
use crate::queue::{InMemoryQueue, JobLine, read_job_lines};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the in-memory queue, seeded from `--jobs`
/// - the process supervisor backend and the worker
/// - SIGINT/SIGTERM handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_config(args.config.as_deref())?;
    let jobs = match &args.jobs {
        Some(path) => load_jobs(path)?,
        None => Vec::new(),
    };

    if args.dry_run {
        print_dry_run(&cfg, &jobs);
        return Ok(());
    }

    let queue = Arc::new(InMemoryQueue::from_config(cfg.queue()));
    for line in jobs {
        match line {
            JobLine::Job(job) => {
                queue.push(job);
            }
            JobLine::Payload(payload) => {
                queue.add(payload);
            }
        }
    }
    if args.once {
        queue.close_when_drained();
    }

    let backend = Arc::new(Supervisor::from_config(cfg.worker()));
    if let Err(e) = backend.check_available() {
        // Not fatal: each job reports the configuration error on its own.
        warn!(error = %e, "configured executable is not available");
    }

    let stop = install_shutdown_handler()?;
    let worker = Worker::start(Arc::clone(&queue), backend, &cfg);

    tokio::select! {
        _ = worker.wait() => info!("worker finished"),
        _ = stop.cancelled() => {
            let signalled = worker.shutdown().await;
            info!(signalled, "worker shut down");
        }
    }

    print_records(&queue)?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ConfigFile> {
    let cfg = match path {
        Some(path) => load_and_validate(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            let path = default_config_path();
            if path.exists() {
                load_and_validate(&path)
                    .with_context(|| format!("loading config from {}", path.display()))?
            } else {
                debug!("no {} found; using defaults", path.display());
                ConfigFile::try_from(RawConfigFile::default())?
            }
        }
    };
    Ok(cfg)
}

fn load_jobs(path: &Path) -> Result<Vec<JobLine>> {
    let jobs = if path == Path::new("-") {
        read_job_lines(io::stdin().lock()).context("reading jobs from stdin")?
    } else {
        let file =
            File::open(path).with_context(|| format!("opening jobs file {}", path.display()))?;
        read_job_lines(BufReader::new(file))
            .with_context(|| format!("reading jobs from {}", path.display()))?
    };
    info!(count = jobs.len(), "loaded jobs");
    Ok(jobs)
}

/// Cancelled on the first SIGTERM or SIGINT.
#[cfg(unix)]
fn install_shutdown_handler() -> Result<CancellationToken> {
    use tokio::signal::unix::{SignalKind, signal};

    let token = CancellationToken::new();
    let token_clone = token.clone();

    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, initiating graceful shutdown"),
            _ = sigint.recv() => info!("received SIGINT, initiating graceful shutdown"),
        }
        token_clone.cancel();
    });

    Ok(token)
}

#[cfg(not(unix))]
fn install_shutdown_handler() -> Result<CancellationToken> {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            return;
        }
        info!("received Ctrl+C, initiating graceful shutdown");
        token_clone.cancel();
    });

    Ok(token)
}

/// Final job records, one JSON object per line on stdout.
fn print_records(queue: &InMemoryQueue) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for record in queue.records() {
        writeln!(out, "{}", serde_json::to_string(&record)?)?;
    }
    out.flush()?;
    Ok(())
}

/// Simple dry-run output: print the effective config and the queued jobs.
fn print_dry_run(cfg: &ConfigFile, jobs: &[JobLine]) {
    let worker = cfg.worker();
    println!("taskvisor dry-run");
    println!("  worker.executable = {}", worker.executable.display());
    if !worker.args.is_empty() {
        println!("  worker.args = {:?}", worker.args);
    }
    println!("  worker.concurrency = {}", worker.concurrency);
    println!("  worker.default_timeout_ms = {}", worker.default_timeout_ms);
    println!("  worker.shutdown_grace_ms = {}", worker.shutdown_grace_ms);
    println!("  worker.permission_mode = {}", worker.permission_mode);
    println!("  queue.max_attempts = {}", cfg.queue().max_attempts);
    println!();

    println!("jobs ({}):", jobs.len());
    for line in jobs {
        let (id, payload) = match line {
            JobLine::Job(job) => (job.id.as_str(), &job.payload),
            JobLine::Payload(payload) => ("<new>", payload),
        };
        println!("  - {id}");
        println!("      cwd: {}", payload.working_directory.display());
        println!("      instruction: {}", payload.instruction);
        if let Some(ms) = payload.options.timeout_ms {
            println!("      timeout_ms: {ms}");
        }
        if let Some(session) = &payload.options.session_id {
            println!("      session_id: {session}");
        }
    }

    debug!("dry-run complete (no execution)");
}
