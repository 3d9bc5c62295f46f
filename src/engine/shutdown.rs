// src/engine/shutdown.rs

//! Graceful shutdown of the worker.
//!
//! Order of operations on the first request:
//! 1. mark the worker as draining (the consumer stops accepting jobs),
//! 2. send every active execution a stop request,
//! 3. wait for the consumer loop to finish, then close the queue connection,
//! 4. clear the active execution table.
//!
//! Later calls skip steps 1 and 2 and only wait for the first call's work to
//! finish, so no process is signalled twice.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::StopReason;
use crate::queue::JobQueue;

use super::active::ActiveExecutions;

#[derive(Debug)]
pub struct ShutdownCoordinator<Q> {
    draining: AtomicBool,
    token: CancellationToken,
    active: Arc<ActiveExecutions>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    queue: Arc<Q>,
}

impl<Q: JobQueue> ShutdownCoordinator<Q> {
    pub fn new(
        token: CancellationToken,
        active: Arc<ActiveExecutions>,
        consumer: JoinHandle<()>,
        queue: Arc<Q>,
    ) -> Self {
        Self {
            draining: AtomicBool::new(false),
            token,
            active,
            consumer: Mutex::new(Some(consumer)),
            queue,
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Stop the worker. Returns how many executions this call signalled.
    pub async fn shutdown(&self) -> usize {
        let signalled = if !self.draining.swap(true, Ordering::SeqCst) {
            info!("shutdown requested; draining worker");
            self.token.cancel();
            let n = self.active.stop_all(StopReason::Shutdown);
            info!(signalled = n, "stop requested for active executions");
            n
        } else {
            debug!("shutdown already in progress");
            0
        };

        self.finish().await;
        signalled
    }

    /// Wait for the consumer loop to end by itself (queue closed).
    pub async fn wait(&self) {
        self.finish().await;
    }

    async fn finish(&self) {
        {
            let mut consumer = self.consumer.lock().await;
            if let Some(handle) = consumer.as_mut() {
                if let Err(e) = handle.await {
                    error!(error = %e, "consumer loop ended abnormally");
                }
                *consumer = None;
            }
        }

        if let Err(e) = self.queue.close().await {
            warn!(error = %e, "closing the queue connection failed");
        }

        let leftover = self.active.clear();
        if leftover > 0 {
            warn!(leftover, "active executions left after shutdown; cleared");
        }
    }
}
