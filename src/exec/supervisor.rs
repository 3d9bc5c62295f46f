// src/exec/supervisor.rs

//! Process supervisor: one external process per job.
//!
//! The run is a single `select!` loop racing:
//! - a stop request from the active-execution table,
//! - the job deadline,
//! - the next stdout chunk (decoded and mapped to progress),
//! - process exit, once stdout is closed.
//!
//! The first of those to decide the outcome wins (see [`OutcomeLatch`]).
//! Timeouts and stop requests then terminate the process; terminal protocol
//! events give it a grace period to exit on its own. The exit code seen after
//! a terminal event is logged and otherwise ignored.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::WorkerSection;
use crate::engine::{ExecutionSlot, OutcomeLatch, Resolution, Terminal};
use crate::errors::{JobError, StopReason};
use crate::exec::backend::{ExecutionBackend, ExecutionEvent};
use crate::exec::executable::resolve_executable;
use crate::exec::request::ExecutionRequest;
use crate::exec::terminate::terminate;
use crate::progress;
use crate::protocol::{DecodedLine, LineDecoder, ProtocolMessage, RunCommand};
use crate::queue::{BoxFuture, ExecutionResult};

const READ_CHUNK: usize = 8 * 1024;
const STDERR_DRAIN: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct Supervisor {
    program: PathBuf,
    args: Vec<String>,
    grace: Duration,
}

impl Supervisor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, grace: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            grace,
        }
    }

    pub fn from_config(worker: &WorkerSection) -> Self {
        Self::new(
            worker.executable.clone(),
            worker.args.clone(),
            worker.shutdown_grace(),
        )
    }

    /// Run one job to completion. No process outlives this call.
    pub async fn run(
        &self,
        request: ExecutionRequest,
        mut slot: ExecutionSlot,
        events: mpsc::UnboundedSender<ExecutionEvent>,
    ) -> Result<ExecutionResult, JobError> {
        let program = resolve_executable(&self.program)?;

        if let Some(reason) = slot.try_stop_requested() {
            info!(job_id = %request.job_id, %reason, "stop requested before spawn");
            return Err(JobError::Cancelled(reason));
        }

        let mut cmd = Command::new(&program);
        cmd.args(&self.args)
            .current_dir(&request.working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| JobError::Spawn {
            program: program.clone(),
            source,
        })?;

        let pid = child.id();
        slot.attach_pid(pid);
        info!(
            job_id = %request.job_id,
            run_id = %request.run_id,
            ?pid,
            program = %program.display(),
            timeout = ?request.timeout,
            "spawned process"
        );

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_logger(request.job_id.clone(), stderr));

        let outcome = self.drive(&request, &mut slot, &mut child, &events).await;

        if let Some(mut task) = stderr_task {
            if timeout(STDERR_DRAIN, &mut task).await.is_err() {
                task.abort();
            }
        }

        match &outcome {
            Ok(result) => info!(
                job_id = %request.job_id,
                elapsed_ms = result.elapsed_ms,
                "run succeeded"
            ),
            Err(err) => warn!(job_id = %request.job_id, error = %err, "run did not succeed"),
        }

        // Dropping the slot removes the active execution.
        drop(slot);
        outcome
    }

    async fn drive(
        &self,
        request: &ExecutionRequest,
        slot: &mut ExecutionSlot,
        child: &mut Child,
        events: &mpsc::UnboundedSender<ExecutionEvent>,
    ) -> Result<ExecutionResult, JobError> {
        let job_id = request.job_id.as_str();

        if let Err(e) = write_command(child.stdin.take(), &request.to_command()).await {
            error!(job_id, error = %e, "failed to write run command");
            self.stop_process(child, job_id).await;
            return Err(JobError::Process(format!(
                "writing run command to stdin: {e}"
            )));
        }

        let mut tracker = RunTracker::new(job_id, events);
        let mut latch = OutcomeLatch::new();
        let mut stdout = child.stdout.take();
        let mut buf = vec![0u8; READ_CHUNK];

        let deadline = sleep(request.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                reason = slot.stop_requested() => {
                    let _ = latch.resolve(Terminal::Cancelled(reason));
                    info!(job_id, %reason, "stopping process");
                    break;
                }

                _ = &mut deadline => {
                    let _ = latch.resolve(Terminal::TimedOut);
                    warn!(
                        job_id,
                        timeout = ?request.timeout,
                        "deadline elapsed before a terminal event"
                    );
                    break;
                }

                read = read_chunk(&mut stdout, &mut buf), if stdout.is_some() => {
                    match read {
                        Ok(0) => {
                            debug!(job_id, "stdout closed");
                            tracker.finish(&mut latch);
                            stdout = None;
                        }
                        Ok(n) => tracker.feed(&buf[..n], &mut latch),
                        Err(e) => {
                            warn!(job_id, error = %e, "reading stdout failed");
                            tracker.finish(&mut latch);
                            stdout = None;
                        }
                    }
                    if !latch.is_pending() {
                        break;
                    }
                }

                status = child.wait(), if stdout.is_none() => {
                    let status = status.map_err(|e| {
                        JobError::Process(format!("waiting for process: {e}"))
                    })?;
                    info!(job_id, exit = %describe_exit(status), "process exited");
                    let _ = latch.resolve(Terminal::Exited {
                        success: status.success(),
                        detail: describe_exit(status),
                    });
                    break;
                }
            }
        }

        let terminal = latch.into_terminal().unwrap_or(Terminal::Exited {
            success: false,
            detail: "run ended without an outcome".to_string(),
        });

        if terminal.requires_termination() {
            self.stop_process(child, job_id).await;
        } else if matches!(terminal, Terminal::Completed | Terminal::Failed(_)) {
            self.settle_after_terminal_event(child, stdout.as_mut(), job_id)
                .await;
        }

        let elapsed = slot.started_at().elapsed();
        let RunTracker {
            output,
            session_id,
            cancel_acknowledged,
            ..
        } = tracker;

        match terminal {
            Terminal::Completed => Ok(ExecutionResult::succeeded(output, session_id, elapsed)),
            Terminal::Exited { detail, .. } if cancel_acknowledged => {
                debug!(job_id, exit = %detail, "process exited after acknowledging cancellation");
                Err(JobError::Cancelled(StopReason::Cancelled))
            }
            Terminal::Exited { success: true, .. } => {
                Ok(ExecutionResult::succeeded(output, session_id, elapsed))
            }
            Terminal::Exited {
                success: false,
                detail,
            } => Err(JobError::Process(detail)),
            Terminal::Failed(message) => Err(JobError::RunFailed(message)),
            Terminal::TimedOut => Err(JobError::TimedOut {
                after: request.timeout,
            }),
            Terminal::Cancelled(reason) => Err(JobError::Cancelled(reason)),
        }
    }

    /// After `run_completed`, `run_failed` or `error`, give the process the
    /// grace period to exit by itself, then terminate it.
    async fn settle_after_terminal_event(
        &self,
        child: &mut Child,
        stdout: Option<&mut ChildStdout>,
        job_id: &str,
    ) {
        let settle = async {
            if let Some(out) = stdout {
                let _ = tokio::io::copy(out, &mut tokio::io::sink()).await;
            }
            child.wait().await
        };

        let settled = timeout(self.grace, settle).await;
        match settled {
            Ok(Ok(status)) => debug!(
                job_id,
                exit = %describe_exit(status),
                "process exited after terminal event; exit status ignored"
            ),
            Ok(Err(e)) => warn!(job_id, error = %e, "waiting for process failed"),
            Err(_) => {
                debug!(job_id, "process lingering after terminal event");
                self.stop_process(child, job_id).await;
            }
        }
    }

    async fn stop_process(&self, child: &mut Child, job_id: &str) {
        match terminate(child, self.grace).await {
            Ok(termination) => info!(job_id, ?termination, "process terminated"),
            Err(e) => {
                error!(job_id, error = %e, "failed to terminate process");
                let _ = child.start_kill();
            }
        }
    }
}

impl ExecutionBackend for Supervisor {
    fn check_available(&self) -> Result<(), JobError> {
        resolve_executable(&self.program).map(|_| ())
    }

    fn execute(
        &self,
        request: ExecutionRequest,
        slot: ExecutionSlot,
        events: mpsc::UnboundedSender<ExecutionEvent>,
    ) -> BoxFuture<'_, Result<ExecutionResult, JobError>> {
        Box::pin(self.run(request, slot, events))
    }
}

/// Per-run accumulation of output, session and progress.
struct RunTracker<'a> {
    job_id: &'a str,
    events: &'a mpsc::UnboundedSender<ExecutionEvent>,
    decoder: LineDecoder,
    progress: u8,
    output: String,
    session_id: Option<String>,
    /// Set by `cancel_requested`; a later exit means the run was cancelled.
    cancel_acknowledged: bool,
}

impl<'a> RunTracker<'a> {
    fn new(job_id: &'a str, events: &'a mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        Self {
            job_id,
            events,
            decoder: LineDecoder::new(),
            progress: 0,
            output: String::new(),
            session_id: None,
            cancel_acknowledged: false,
        }
    }

    fn feed(&mut self, chunk: &[u8], latch: &mut OutcomeLatch) {
        for line in self.decoder.push(chunk) {
            self.handle_line(line, latch);
        }
    }

    fn finish(&mut self, latch: &mut OutcomeLatch) {
        if let Some(line) = self.decoder.finish() {
            self.handle_line(line, latch);
        }
    }

    fn handle_line(&mut self, line: DecodedLine, latch: &mut OutcomeLatch) {
        match line {
            DecodedLine::Text(text) => self.output.push_str(&text),
            DecodedLine::Message(message) => self.handle_message(message, latch),
        }
    }

    fn handle_message(&mut self, message: ProtocolMessage, latch: &mut OutcomeLatch) {
        let job_id = self.job_id;

        // Progress only moves while the outcome is open.
        if latch.is_pending() {
            self.advance(progress::apply(self.progress, &message));
        }

        match message {
            ProtocolMessage::RunStarted { session_id } => {
                info!(job_id, session_id = ?session_id, "run started");
                self.capture_session(session_id);
            }
            ProtocolMessage::Stream(chunk) => {
                self.output.push_str(&chunk.text());
            }
            ProtocolMessage::LimitNotice { message } => {
                warn!(job_id, notice = %message, "limit notice");
                let _ = self.events.send(ExecutionEvent::Notice(message));
            }
            ProtocolMessage::CancelAcknowledged => {
                info!(job_id, "program acknowledged cancellation");
                self.cancel_acknowledged = true;
            }
            ProtocolMessage::RunCompleted { session_id } => {
                self.capture_session(session_id);
                if latch.resolve(Terminal::Completed) == Resolution::AlreadyResolved {
                    debug!(job_id, "ignoring run_completed after outcome was decided");
                }
            }
            ProtocolMessage::RunFailed { error } => {
                let message = error.unwrap_or_else(|| "run failed".to_string());
                if latch.resolve(Terminal::Failed(message)) == Resolution::AlreadyResolved {
                    debug!(job_id, "ignoring run_failed after outcome was decided");
                }
            }
            ProtocolMessage::Error { message } => {
                let message = message.unwrap_or_else(|| "error event".to_string());
                warn!(job_id, error = %message, "program reported an error");
                if latch.resolve(Terminal::Failed(message)) == Resolution::AlreadyResolved {
                    debug!(job_id, "ignoring error after outcome was decided");
                }
            }
            ProtocolMessage::Other { event } => {
                debug!(job_id, event = ?event, "ignoring unknown event");
            }
        }
    }

    fn advance(&mut self, next: u8) {
        if next > self.progress {
            self.progress = next;
            let _ = self.events.send(ExecutionEvent::Progress(next));
        }
    }

    fn capture_session(&mut self, session_id: Option<String>) {
        if let Some(id) = session_id {
            self.session_id = Some(id);
        }
    }
}

async fn write_command(stdin: Option<ChildStdin>, command: &RunCommand) -> io::Result<()> {
    let mut stdin = stdin.ok_or_else(|| io::Error::other("stdin is not piped"))?;
    let line = command.to_line().map_err(io::Error::other)?;
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;
    // Dropping `stdin` closes the pipe: one command per run.
    Ok(())
}

async fn read_chunk(stdout: &mut Option<ChildStdout>, buf: &mut [u8]) -> io::Result<usize> {
    match stdout {
        Some(out) => out.read(buf).await,
        None => std::future::pending().await,
    }
}

fn spawn_stderr_logger(job_id: String, stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(job_id = %job_id, "stderr: {}", line);
        }
    })
}

pub(crate) fn describe_exit(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with code {code}");
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {signal}");
        }
    }

    "exited without a status code".to_string()
}
