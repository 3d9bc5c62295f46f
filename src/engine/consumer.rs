// src/engine/consumer.rs

//! Bounded-concurrency job consumer loop.
//!
//! Pulls jobs from a [`JobQueue`] and hands each to an
//! [`ExecutionBackend`], with at most `concurrency` jobs in flight. A single
//! job's failure (or panic) is reported to the queue and never ends the loop.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{JobError, JobFailure, StopReason};
use crate::exec::{ExecutionBackend, ExecutionDefaults, ExecutionEvent, ExecutionRequest};
use crate::queue::{ExecutionResult, Job, JobId, JobQueue, QueueDelivery};

use super::active::ActiveExecutions;

/// Slack on top of the termination grace period when draining.
const DRAIN_MARGIN: Duration = Duration::from_secs(1);

/// Knobs for [`JobConsumer`].
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub concurrency: usize,
    pub defaults: ExecutionDefaults,
    /// Delay before polling again after a queue error.
    pub poll_backoff: Duration,
    /// Termination grace period of the backend; bounds the drain.
    pub shutdown_grace: Duration,
}

struct Shared<Q, B> {
    queue: Arc<Q>,
    backend: Arc<B>,
    active: Arc<ActiveExecutions>,
    defaults: ExecutionDefaults,
    shutdown: CancellationToken,
}

pub struct JobConsumer<Q, B> {
    shared: Arc<Shared<Q, B>>,
    permits: Arc<Semaphore>,
    poll_backoff: Duration,
    drain_timeout: Duration,
}

impl<Q, B> fmt::Debug for JobConsumer<Q, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobConsumer")
            .field("available_permits", &self.permits.available_permits())
            .field("active", &self.shared.active)
            .finish_non_exhaustive()
    }
}

impl<Q: JobQueue, B: ExecutionBackend> JobConsumer<Q, B> {
    pub fn new(
        queue: Arc<Q>,
        backend: Arc<B>,
        active: Arc<ActiveExecutions>,
        shutdown: CancellationToken,
        options: ConsumerOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                backend,
                active,
                defaults: options.defaults,
                shutdown,
            }),
            permits: Arc::new(Semaphore::new(options.concurrency.max(1))),
            poll_backoff: options.poll_backoff,
            drain_timeout: options.shutdown_grace * 2 + DRAIN_MARGIN,
        }
    }

    /// Main loop. Returns once the queue is closed or shutdown is requested,
    /// after in-flight jobs have been drained.
    pub async fn run(self) {
        info!(
            concurrency = self.permits.available_permits(),
            "job consumer started"
        );

        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut in_flight: HashMap<task::Id, JobId> = HashMap::new();
        let shutdown = self.shared.shutdown.clone();

        loop {
            // Wait for a free slot before asking the queue for work.
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown requested; no longer accepting jobs");
                    break;
                }
                Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    self.reap(joined, &mut in_flight).await;
                    continue;
                }
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Keep reaping while waiting: a job's outcome may be what the
            // queue is waiting for.
            let delivery = loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break None,
                    Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                        self.reap(joined, &mut in_flight).await;
                    }
                    delivery = self.shared.queue.next_job() => break Some(delivery),
                }
            };
            let Some(delivery) = delivery else {
                info!("shutdown requested; no longer accepting jobs");
                break;
            };

            match delivery {
                Ok(Some(QueueDelivery::Job(job))) => {
                    let job_id = job.id.clone();
                    debug!(job_id = %job_id, attempt = job.attempts_made + 1, "job received");
                    let shared = Arc::clone(&self.shared);
                    let handle = tasks.spawn(async move {
                        let _permit = permit;
                        process_job(shared, job).await;
                    });
                    in_flight.insert(handle.id(), job_id);
                }
                Ok(Some(QueueDelivery::Stalled { job_id })) => {
                    warn!(job_id = %job_id, "queue reported a stalled job");
                }
                Ok(None) => {
                    info!("queue closed; consumer stopping");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "queue error; retrying after backoff");
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(self.poll_backoff) => {}
                    }
                }
            }
        }

        self.drain(tasks, in_flight).await;
        info!("job consumer stopped");
    }

    async fn drain(&self, mut tasks: JoinSet<()>, mut in_flight: HashMap<task::Id, JobId>) {
        if tasks.is_empty() {
            return;
        }
        info!(in_flight = tasks.len(), "waiting for in-flight jobs");

        let drained = timeout(self.drain_timeout, async {
            while let Some(joined) = tasks.join_next_with_id().await {
                self.reap(joined, &mut in_flight).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = tasks.len(),
                "in-flight jobs did not finish in time; aborting"
            );
            // Aborting drops the backend futures; their processes are killed
            // on drop and their slots are released.
            tasks.shutdown().await;
        }
    }

    async fn reap(
        &self,
        joined: Result<(task::Id, ()), JoinError>,
        in_flight: &mut HashMap<task::Id, JobId>,
    ) {
        match joined {
            Ok((id, ())) => {
                in_flight.remove(&id);
            }
            Err(err) => {
                let job_id = in_flight.remove(&err.id());
                if err.is_panic() {
                    error!(job_id = ?job_id, "job task panicked");
                    if let Some(job_id) = job_id {
                        let failure = JobFailure::from(&JobError::Process(
                            "worker task panicked".to_string(),
                        ));
                        if let Err(e) = self.shared.queue.fail(&job_id, failure).await {
                            error!(job_id = %job_id, error = %e, "failed to report panicked job");
                        }
                    }
                }
            }
        }
    }
}

/// Run one job end to end and report its outcome to the queue.
async fn process_job<Q: JobQueue, B: ExecutionBackend>(shared: Arc<Shared<Q, B>>, job: Job) {
    let job_id = job.id.clone();
    let result = execute_job(&shared, &job).await;
    report(shared.queue.as_ref(), &job_id, result).await;
}

async fn execute_job<Q: JobQueue, B: ExecutionBackend>(
    shared: &Shared<Q, B>,
    job: &Job,
) -> Result<ExecutionResult, JobError> {
    let job_id = job.id.as_str();

    if let Err(e) = shared.queue.update_progress(job_id, 0).await {
        warn!(job_id, error = %e, "failed to initialise progress");
    }

    shared.backend.check_available()?;

    let request = ExecutionRequest::from_job(job, &shared.defaults);
    let slot = shared
        .active
        .register(job_id, request.timeout)
        .ok_or_else(|| JobError::AlreadyRunning(job_id.to_string()))?;

    // A slot registered after the shutdown sweep would never be stopped.
    if shared.shutdown.is_cancelled() {
        return Err(JobError::Cancelled(StopReason::Shutdown));
    }

    info!(
        job_id,
        run_id = %request.run_id,
        attempt = job.attempts_made + 1,
        "executing job"
    );

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (result, ()) = tokio::join!(
        shared.backend.execute(request, slot, events_tx),
        forward_events(shared.queue.as_ref(), job_id, events_rx),
    );
    result
}

async fn forward_events<Q: JobQueue>(
    queue: &Q,
    job_id: &str,
    mut events: mpsc::UnboundedReceiver<ExecutionEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ExecutionEvent::Progress(progress) => {
                debug!(job_id, progress, "progress");
                if let Err(e) = queue.update_progress(job_id, progress).await {
                    warn!(job_id, error = %e, "failed to report progress");
                }
            }
            ExecutionEvent::Notice(message) => {
                if let Err(e) = queue.log(job_id, message).await {
                    warn!(job_id, error = %e, "failed to attach log line");
                }
            }
        }
    }
}

async fn report<Q: JobQueue>(queue: &Q, job_id: &str, result: Result<ExecutionResult, JobError>) {
    let reported = match result {
        Ok(result) => queue.complete(job_id, result).await,
        Err(err) => {
            warn!(job_id, kind = ?err.kind(), error = %err, "job failed");
            queue.fail(job_id, JobFailure::from(&err)).await
        }
    };

    if let Err(e) = reported {
        error!(job_id, error = %e, "failed to report job outcome");
    }
}
