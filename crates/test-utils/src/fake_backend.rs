use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use taskvisor::engine::ExecutionSlot;
use taskvisor::errors::JobError;
use taskvisor::exec::{ExecutionBackend, ExecutionEvent, ExecutionRequest};
use taskvisor::queue::{BoxFuture, ExecutionResult, JobId};

/// What the fake does for a given instruction.
#[derive(Debug, Clone)]
pub enum FakeBehaviour {
    /// Report progress, wait `delay`, succeed with the instruction as output.
    Succeed { delay: Duration },
    /// Wait `delay`, then fail with a `run_failed` error.
    Fail { delay: Duration, message: String },
    /// Run until a stop request arrives.
    WaitForStop,
    /// Panic inside the job task.
    Panic,
}

/// A backend that never spawns processes.
///
/// - records which jobs were executed, in order
/// - tracks how many run at the same time
/// - honours stop requests like the real supervisor
pub struct FakeBackend {
    default: FakeBehaviour,
    overrides: Mutex<HashMap<String, FakeBehaviour>>,
    available: bool,
    executed: Arc<Mutex<Vec<JobId>>>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn new(default: FakeBehaviour) -> Self {
        Self {
            default,
            overrides: Mutex::new(HashMap::new()),
            available: true,
            executed: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicUsize::new(0)),
            max_running: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn succeeding(delay: Duration) -> Self {
        Self::new(FakeBehaviour::Succeed { delay })
    }

    /// A backend whose pre-flight check always fails.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::succeeding(Duration::ZERO)
        }
    }

    /// Use `behaviour` for jobs whose instruction is `instruction`.
    pub fn with(self, instruction: &str, behaviour: FakeBehaviour) -> Self {
        self.overrides
            .lock()
            .unwrap()
            .insert(instruction.to_string(), behaviour);
        self
    }

    pub fn executed(&self) -> Vec<JobId> {
        self.executed.lock().unwrap().clone()
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn behaviour_for(&self, instruction: &str) -> FakeBehaviour {
        self.overrides
            .lock()
            .unwrap()
            .get(instruction)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ExecutionBackend for FakeBackend {
    fn check_available(&self) -> Result<(), JobError> {
        if self.available {
            Ok(())
        } else {
            Err(JobError::Configuration("fake backend unavailable".into()))
        }
    }

    fn execute(
        &self,
        request: ExecutionRequest,
        mut slot: ExecutionSlot,
        events: mpsc::UnboundedSender<ExecutionEvent>,
    ) -> BoxFuture<'_, Result<ExecutionResult, JobError>> {
        let behaviour = self.behaviour_for(&request.instruction);

        Box::pin(async move {
            self.executed.lock().unwrap().push(request.job_id.clone());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            let _guard = RunningGuard(Arc::clone(&self.running));

            let _ = events.send(ExecutionEvent::Progress(20));

            let (delay, outcome) = match behaviour {
                FakeBehaviour::Succeed { delay } => (delay, Ok(())),
                FakeBehaviour::Fail { delay, message } => (delay, Err(message)),
                FakeBehaviour::WaitForStop => {
                    let reason = slot.stop_requested().await;
                    return Err(JobError::Cancelled(reason));
                }
                FakeBehaviour::Panic => panic!("fake backend panic for {}", request.job_id),
            };

            tokio::select! {
                reason = slot.stop_requested() => return Err(JobError::Cancelled(reason)),
                _ = tokio::time::sleep(delay) => {}
            }

            let _ = events.send(ExecutionEvent::Progress(60));

            match outcome {
                Ok(()) => {
                    let _ = events.send(ExecutionEvent::Progress(100));
                    Ok(ExecutionResult::succeeded(
                        request.instruction.clone(),
                        None,
                        slot.started_at().elapsed(),
                    ))
                }
                Err(message) => Err(JobError::RunFailed(message)),
            }
        })
    }
}
