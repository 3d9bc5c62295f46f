// src/engine/mod.rs

//! Orchestration engine for taskvisor.
//!
//! This module ties together:
//! - the job consumer loop (bounded concurrency, one backend run per job)
//! - the active execution table (stop channels for running jobs)
//! - first-wins outcome resolution used by the supervisor
//! - the shutdown coordinator
//!
//! [`Worker::start`] wires these up and returns a [`WorkerHandle`] used to
//! cancel jobs and to shut the worker down.

pub mod active;
pub mod consumer;
pub mod outcome;
pub mod shutdown;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ConfigFile;
use crate::errors::StopReason;
use crate::exec::{ExecutionBackend, ExecutionDefaults};
use crate::queue::JobQueue;

pub use active::{ActiveExecutionInfo, ActiveExecutions, ExecutionSlot};
pub use consumer::{ConsumerOptions, JobConsumer};
pub use outcome::{OutcomeLatch, Resolution, Terminal};
pub use shutdown::ShutdownCoordinator;

pub struct Worker;

impl Worker {
    /// Spawn the consumer loop on the current runtime.
    pub fn start<Q: JobQueue, B: ExecutionBackend>(
        queue: Arc<Q>,
        backend: Arc<B>,
        config: &ConfigFile,
    ) -> WorkerHandle<Q> {
        let worker = config.worker();
        let options = ConsumerOptions {
            concurrency: worker.concurrency,
            defaults: ExecutionDefaults::from_config(worker),
            poll_backoff: config.queue().poll_backoff(),
            shutdown_grace: worker.shutdown_grace(),
        };
        Self::start_with(queue, backend, options)
    }

    pub fn start_with<Q: JobQueue, B: ExecutionBackend>(
        queue: Arc<Q>,
        backend: Arc<B>,
        options: ConsumerOptions,
    ) -> WorkerHandle<Q> {
        let active = Arc::new(ActiveExecutions::new());
        let token = CancellationToken::new();

        info!(concurrency = options.concurrency, "starting worker");
        let consumer = JobConsumer::new(
            Arc::clone(&queue),
            backend,
            Arc::clone(&active),
            token.clone(),
            options,
        );
        let handle = tokio::spawn(consumer.run());

        WorkerHandle {
            coordinator: Arc::new(ShutdownCoordinator::new(
                token,
                Arc::clone(&active),
                handle,
                queue,
            )),
            active,
        }
    }
}

/// Control surface of a running worker. Cheap to clone.
#[derive(Debug)]
pub struct WorkerHandle<Q> {
    coordinator: Arc<ShutdownCoordinator<Q>>,
    active: Arc<ActiveExecutions>,
}

impl<Q> Clone for WorkerHandle<Q> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
            active: Arc::clone(&self.active),
        }
    }
}

impl<Q: JobQueue> WorkerHandle<Q> {
    /// Request cancellation of a running job. Returns `false` if the job is
    /// not running here or was already asked to stop.
    pub fn cancel(&self, job_id: &str) -> bool {
        let sent = self.active.stop(job_id, StopReason::Cancelled);
        if sent {
            info!(job_id, "cancellation requested");
        }
        sent
    }

    /// Shut the worker down. Safe to call more than once.
    pub async fn shutdown(&self) -> usize {
        self.coordinator.shutdown().await
    }

    /// Wait until the consumer loop stops by itself.
    pub async fn wait(&self) {
        self.coordinator.wait().await
    }

    pub fn is_draining(&self) -> bool {
        self.coordinator.is_draining()
    }

    pub fn active(&self) -> &Arc<ActiveExecutions> {
        &self.active
    }
}
