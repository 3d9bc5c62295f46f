// src/queue/mod.rs

//! Job queue abstraction.
//!
//! The broker is an external collaborator; the worker only talks to it
//! through [`JobQueue`]. [`InMemoryQueue`] is the implementation used by the
//! `taskvisor` binary (jobs loaded from a JSON-lines file) and by the tests.

use std::future::Future;
use std::pin::Pin;

use crate::errors::{JobFailure, Result};

pub mod job;
pub mod memory;
pub mod source;

pub use job::{ExecutionResult, Job, JobId, JobOptions, JobPayload, JobStatus};
pub use memory::{InMemoryQueue, JobRecord};
pub use source::{JobLine, read_job_lines};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What the queue hands to the consumer loop.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueDelivery {
    Job(Job),
    /// The broker noticed a job whose worker stopped reporting.
    Stalled { job_id: JobId },
}

/// Trait abstracting the queue broker.
///
/// Only the consumer loop calls `next_job`; the other methods may be called
/// from any in-flight job.
pub trait JobQueue: Send + Sync + 'static {
    /// Wait for the next delivery. `Ok(None)` means the queue is closed.
    ///
    /// Must be cancel-safe: dropping the future before it resolves must not
    /// lose a job.
    fn next_job(&self) -> BoxFuture<'_, Result<Option<QueueDelivery>>>;

    fn update_progress<'a>(&'a self, job_id: &'a str, progress: u8) -> BoxFuture<'a, Result<()>>;

    /// Attach a log line to the job record (e.g. limit notices).
    fn log<'a>(&'a self, job_id: &'a str, line: String) -> BoxFuture<'a, Result<()>>;

    fn complete<'a>(&'a self, job_id: &'a str, result: ExecutionResult) -> BoxFuture<'a, Result<()>>;

    fn fail<'a>(&'a self, job_id: &'a str, failure: JobFailure) -> BoxFuture<'a, Result<()>>;

    /// Close the consumer connection. Must be idempotent.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}
