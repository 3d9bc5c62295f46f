// src/exec/backend.rs

//! Pluggable execution backend abstraction.
//!
//! The consumer loop talks to an `ExecutionBackend` instead of spawning
//! processes itself. Production uses [`Supervisor`](super::Supervisor);
//! tests can provide a backend that never touches the OS.

use tokio::sync::mpsc;

use crate::engine::ExecutionSlot;
use crate::errors::JobError;
use crate::exec::request::ExecutionRequest;
use crate::queue::{BoxFuture, ExecutionResult};

/// Side-channel updates emitted while a job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    /// New progress value; always higher than the previous one.
    Progress(u8),
    /// A warning the program surfaced (`limit_notice`).
    Notice(String),
}

pub trait ExecutionBackend: Send + Sync + 'static {
    /// Cheap pre-flight check run before anything is registered or spawned.
    fn check_available(&self) -> Result<(), JobError>;

    /// Run one job to its terminal outcome.
    ///
    /// The backend owns `slot` for the whole run and must honour its stop
    /// requests. Dropping the slot is what removes the active execution.
    fn execute(
        &self,
        request: ExecutionRequest,
        slot: ExecutionSlot,
        events: mpsc::UnboundedSender<ExecutionEvent>,
    ) -> BoxFuture<'_, Result<ExecutionResult, JobError>>;
}
