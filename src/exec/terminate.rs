// src/exec/terminate.rs

//! Two-step termination of a supervised process.
//!
//! SIGTERM first, then SIGKILL once the grace period is over. The child is
//! always reaped before returning, so no zombie is left behind.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had already exited; no signal was sent.
    AlreadyExited(ExitStatus),
    /// The process exited within the grace period after SIGTERM.
    Graceful(ExitStatus),
    /// The grace period ran out and the process was killed.
    Killed,
}

pub async fn terminate(child: &mut Child, grace: Duration) -> io::Result<Termination> {
    if let Some(status) = child.try_wait()? {
        return Ok(Termination::AlreadyExited(status));
    }

    let pid = child.id();
    if let Err(e) = send_terminate(child) {
        debug!(?pid, error = %e, "graceful termination signal failed; killing");
        child.kill().await?;
        return Ok(Termination::Killed);
    }
    debug!(?pid, grace_ms = grace.as_millis() as u64, "sent termination signal");

    match timeout(grace, child.wait()).await {
        Ok(status) => Ok(Termination::Graceful(status?)),
        Err(_) => {
            warn!(?pid, "process ignored termination signal; killing");
            child.kill().await?;
            Ok(Termination::Killed)
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let pid = child
        .id()
        .and_then(|pid| i32::try_from(pid).ok())
        .ok_or_else(|| io::Error::other("process has no pid"))?;

    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::Stdio;
    use tokio::process::Command;

    fn spawn_sh(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("spawn sh")
    }

    #[tokio::test]
    async fn sigterm_stops_a_cooperative_process() {
        let mut child = spawn_sh("exec sleep 30");
        let outcome = terminate(&mut child, Duration::from_secs(5)).await.unwrap();
        match outcome {
            Termination::Graceful(status) => assert_eq!(status.signal(), Some(15)),
            other => panic!("expected graceful exit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn escalates_when_sigterm_is_ignored() {
        let mut child = spawn_sh("trap '' TERM; while :; do sleep 1; done");
        // Let the shell install its trap.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome = terminate(&mut child, Duration::from_millis(200)).await.unwrap();
        assert_eq!(outcome, Termination::Killed);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn already_exited_processes_are_not_signalled() {
        let mut child = spawn_sh("exit 3");
        child.wait().await.unwrap();
        match terminate(&mut child, Duration::from_secs(1)).await.unwrap() {
            Termination::AlreadyExited(status) => assert_eq!(status.code(), Some(3)),
            other => panic!("expected AlreadyExited, got {:?}", other),
        }
    }
}
