// src/queue/memory.rs

//! In-process FIFO queue with retries.
//!
//! Semantics:
//! - Jobs are delivered in insertion order; a retried job goes to the back.
//! - A failed job is retried while `failure.retryable` holds and fewer than
//!   `max_attempts` attempts have been made.
//! - `close_when_drained` makes `next_job` return `None` once nothing is
//!   pending or running (used by `--once`).

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::QueueSection;
use crate::errors::{FailureKind, JobFailure, Result, TaskvisorError};
use crate::progress::COMPLETE;
use crate::queue::job::{ExecutionResult, Job, JobId, JobPayload, JobStatus};
use crate::queue::{BoxFuture, JobQueue, QueueDelivery};

/// Everything the queue knows about one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub job: Job,
    pub status: JobStatus,
    pub progress: u8,
    /// Progress values reported during the current attempt, in order.
    pub progress_history: Vec<u8>,
    pub logs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<JobId>,
    records: HashMap<JobId, JobRecord>,
    /// Insertion order, for stable listings.
    order: Vec<JobId>,
    stalled: VecDeque<JobId>,
    closed: bool,
    close_when_drained: bool,
}

impl QueueState {
    fn running_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.status == JobStatus::Running)
            .count()
    }

    fn running_record(&mut self, job_id: &str) -> Result<&mut JobRecord> {
        let record = self
            .records
            .get_mut(job_id)
            .ok_or_else(|| TaskvisorError::QueueError(format!("unknown job {job_id}")))?;
        if record.status != JobStatus::Running {
            return Err(TaskvisorError::QueueError(format!(
                "job {job_id} is not running (status {:?})",
                record.status
            )));
        }
        Ok(record)
    }
}

#[derive(Debug)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    max_attempts: u32,
}

impl InMemoryQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(section: &QueueSection) -> Self {
        Self::new(section.max_attempts)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a payload under a fresh id.
    pub fn add(&self, payload: JobPayload) -> JobId {
        let id = Uuid::new_v4().to_string();
        let job = Job {
            id: id.clone(),
            payload,
            attempts_made: 0,
        };
        // Fresh uuids cannot collide.
        let _ = self.push(job);
        id
    }

    /// Enqueue a job under its own id. Returns `false` if the id is taken.
    pub fn push(&self, job: Job) -> bool {
        {
            let mut state = self.lock();
            if state.records.contains_key(&job.id) {
                warn!(job_id = %job.id, "duplicate job id; ignoring");
                return false;
            }
            let id = job.id.clone();
            state.records.insert(
                id.clone(),
                JobRecord {
                    job,
                    status: JobStatus::Queued,
                    progress: 0,
                    progress_history: Vec::new(),
                    logs: Vec::new(),
                    result: None,
                    failure: None,
                },
            );
            state.order.push(id.clone());
            state.pending.push_back(id.clone());
            debug!(job_id = %id, "job enqueued");
        }
        self.notify.notify_one();
        true
    }

    /// Tell the consumer that `job_id` stalled.
    pub fn report_stalled(&self, job_id: &str) {
        self.lock().stalled.push_back(job_id.to_string());
        self.notify.notify_one();
    }

    /// Close automatically once no job is pending or running.
    pub fn close_when_drained(&self) {
        self.lock().close_when_drained = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn record(&self, job_id: &str) -> Option<JobRecord> {
        self.lock().records.get(job_id).cloned()
    }

    /// All records in insertion order.
    pub fn records(&self) -> Vec<JobRecord> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.lock().running_count()
    }

    fn try_next(&self) -> Option<Option<QueueDelivery>> {
        let mut state = self.lock();

        if state.closed {
            return Some(None);
        }

        if let Some(job_id) = state.stalled.pop_front() {
            return Some(Some(QueueDelivery::Stalled { job_id }));
        }

        while let Some(id) = state.pending.pop_front() {
            if let Some(record) = state.records.get_mut(&id) {
                record.status = JobStatus::Running;
                record.progress = 0;
                record.progress_history.clear();
                return Some(Some(QueueDelivery::Job(record.job.clone())));
            }
        }

        if state.close_when_drained && state.running_count() == 0 {
            info!("queue drained; closing");
            state.closed = true;
            return Some(None);
        }

        None
    }
}

impl JobQueue for InMemoryQueue {
    fn next_job(&self) -> BoxFuture<'_, Result<Option<QueueDelivery>>> {
        Box::pin(async move {
            loop {
                let notified = self.notify.notified();
                if let Some(delivery) = self.try_next() {
                    return Ok(delivery);
                }
                notified.await;
            }
        })
    }

    fn update_progress<'a>(&'a self, job_id: &'a str, progress: u8) -> BoxFuture<'a, Result<()>> {
        let res = {
            let mut state = self.lock();
            state.running_record(job_id).map(|record| {
                let progress = progress.min(COMPLETE);
                record.progress = progress;
                record.progress_history.push(progress);
            })
        };
        Box::pin(async move { res })
    }

    fn log<'a>(&'a self, job_id: &'a str, line: String) -> BoxFuture<'a, Result<()>> {
        let res = {
            let mut state = self.lock();
            match state.records.get_mut(job_id) {
                Some(record) => {
                    record.logs.push(line);
                    Ok(())
                }
                None => Err(TaskvisorError::QueueError(format!("unknown job {job_id}"))),
            }
        };
        Box::pin(async move { res })
    }

    fn complete<'a>(&'a self, job_id: &'a str, result: ExecutionResult) -> BoxFuture<'a, Result<()>> {
        let res = {
            let mut state = self.lock();
            state.running_record(job_id).map(|record| {
                record.status = JobStatus::Succeeded;
                record.result = Some(result);
                record.failure = None;
            })
        };
        if res.is_ok() {
            info!(job_id, "job completed");
            self.notify.notify_one();
        }
        Box::pin(async move { res })
    }

    fn fail<'a>(&'a self, job_id: &'a str, failure: JobFailure) -> BoxFuture<'a, Result<()>> {
        let max_attempts = self.max_attempts;
        let res = {
            let mut state = self.lock();
            let retry = state.running_record(job_id).map(|record| {
                let attempts = record.job.attempts_made + 1;
                let retry = failure.retryable && attempts < max_attempts;

                record.status = if retry {
                    JobStatus::Queued
                } else if failure.kind == FailureKind::Cancelled {
                    JobStatus::Cancelled
                } else {
                    JobStatus::Failed
                };
                if retry {
                    record.job.attempts_made = attempts;
                }
                record.failure = Some(failure);
                retry
            });

            if let Ok(true) = retry {
                state.pending.push_back(job_id.to_string());
                info!(job_id, "job failed; re-queued for another attempt");
            }
            retry.map(|_| ())
        };
        if res.is_ok() {
            self.notify.notify_one();
        }
        Box::pin(async move { res })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        let was_closed = {
            let mut state = self.lock();
            std::mem::replace(&mut state.closed, true)
        };
        if !was_closed {
            info!("queue connection closed");
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn payload(instruction: &str) -> JobPayload {
        JobPayload {
            instruction: instruction.to_string(),
            working_directory: PathBuf::from("."),
            options: Default::default(),
        }
    }

    fn failure(kind: FailureKind, retryable: bool) -> JobFailure {
        JobFailure {
            kind,
            message: "boom".into(),
            retryable,
        }
    }

    async fn next(queue: &InMemoryQueue) -> Job {
        match queue.next_job().await.unwrap() {
            Some(QueueDelivery::Job(job)) => job,
            other => panic!("expected job, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let queue = InMemoryQueue::new(1);
        let a = queue.add(payload("a"));
        let b = queue.add(payload("b"));

        assert_eq!(next(&queue).await.id, a);
        assert_eq!(next(&queue).await.id, b);
        assert_eq!(queue.running_count(), 2);
    }

    #[tokio::test]
    async fn retries_retryable_failures_until_attempts_run_out() {
        let queue = InMemoryQueue::new(2);
        let id = queue.add(payload("flaky"));

        let first = next(&queue).await;
        queue.fail(&first.id, failure(FailureKind::Process, true)).await.unwrap();
        assert_eq!(queue.record(&id).unwrap().status, JobStatus::Queued);

        let second = next(&queue).await;
        assert_eq!(second.attempts_made, 1);
        queue.fail(&second.id, failure(FailureKind::Process, true)).await.unwrap();
        assert_eq!(queue.record(&id).unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn cancelled_jobs_end_cancelled() {
        let queue = InMemoryQueue::new(3);
        let id = queue.add(payload("x"));
        let job = next(&queue).await;
        queue.fail(&job.id, failure(FailureKind::Cancelled, false)).await.unwrap();
        assert_eq!(queue.record(&id).unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn rejects_reports_for_finished_jobs() {
        let queue = InMemoryQueue::new(1);
        let id = queue.add(payload("x"));
        let job = next(&queue).await;

        let result = ExecutionResult::succeeded("out".into(), None, Default::default());
        queue.complete(&job.id, result.clone()).await.unwrap();
        assert!(queue.complete(&id, result).await.is_err());
        assert!(queue.update_progress(&id, 50).await.is_err());
    }

    #[tokio::test]
    async fn close_when_drained_waits_for_running_jobs() {
        let queue = InMemoryQueue::new(1);
        queue.add(payload("x"));
        queue.close_when_drained();

        let job = next(&queue).await;
        queue.update_progress(&job.id, 40).await.unwrap();
        queue
            .complete(&job.id, ExecutionResult::succeeded(String::new(), None, Default::default()))
            .await
            .unwrap();

        assert_eq!(queue.next_job().await.unwrap(), None);
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn stalled_notifications_are_delivered() {
        let queue = InMemoryQueue::new(1);
        queue.report_stalled("gone");
        assert_eq!(
            queue.next_job().await.unwrap(),
            Some(QueueDelivery::Stalled {
                job_id: "gone".into()
            })
        );
    }
}
