// src/engine/active.rs

//! Table of executions currently running on this worker.
//!
//! Each entry holds the stop channel for one job's process. Entries are
//! created through [`ActiveExecutions::register`], which hands back an
//! [`ExecutionSlot`]; dropping the slot removes the entry. Every register is
//! therefore matched by exactly one removal, whichever path ends the job.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::errors::StopReason;
use crate::queue::JobId;

struct ActiveExecution {
    /// Distinguishes this registration from a later one under the same id.
    token: u64,
    started_at: Instant,
    deadline: Instant,
    pid: Option<u32>,
    /// Taken on the first stop request, so a process is signalled once.
    stop: Option<oneshot::Sender<StopReason>>,
}

#[derive(Default)]
struct ActiveTable {
    entries: HashMap<JobId, ActiveExecution>,
    next_token: u64,
}

/// Point-in-time view of one active execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveExecutionInfo {
    pub job_id: JobId,
    pub pid: Option<u32>,
    pub started_at: Instant,
    pub deadline: Instant,
    pub stop_requested: bool,
}

#[derive(Default)]
pub struct ActiveExecutions {
    inner: Mutex<ActiveTable>,
}

impl std::fmt::Debug for ActiveExecutions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveExecutions")
            .field("len", &self.len())
            .finish()
    }
}

impl ActiveExecutions {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, ActiveTable> {
        // The table holds no invariants a panicking holder could break
        // half-way, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new execution for `job_id`.
    ///
    /// Returns `None` if the job already has a live entry.
    pub fn register(self: &Arc<Self>, job_id: &str, timeout: Duration) -> Option<ExecutionSlot> {
        let (stop_tx, stop_rx) = oneshot::channel();
        let started_at = Instant::now();

        let token = {
            let mut table = self.table();
            if table.entries.contains_key(job_id) {
                return None;
            }
            table.next_token += 1;
            let token = table.next_token;
            table.entries.insert(
                job_id.to_string(),
                ActiveExecution {
                    token,
                    started_at,
                    deadline: started_at + timeout,
                    pid: None,
                    stop: Some(stop_tx),
                },
            );
            token
        };

        debug!(job_id, token, "registered active execution");

        Some(ExecutionSlot {
            job_id: job_id.to_string(),
            token,
            started_at,
            table: Arc::clone(self),
            stop_rx: Some(stop_rx),
        })
    }

    /// Ask the execution for `job_id` to stop.
    ///
    /// Returns `false` if the job is unknown or was already asked to stop.
    pub fn stop(&self, job_id: &str, reason: StopReason) -> bool {
        let sender = {
            let mut table = self.table();
            table.entries.get_mut(job_id).and_then(|e| e.stop.take())
        };

        match sender {
            Some(tx) => {
                info!(job_id, %reason, "stop requested for active execution");
                // The receiver may already be gone if the job finished a
                // moment ago; the entry disappears with it.
                tx.send(reason).is_ok()
            }
            None => false,
        }
    }

    /// Ask every active execution to stop. Returns how many were signalled.
    pub fn stop_all(&self, reason: StopReason) -> usize {
        let senders: Vec<(JobId, oneshot::Sender<StopReason>)> = {
            let mut table = self.table();
            table
                .entries
                .iter_mut()
                .filter_map(|(id, e)| e.stop.take().map(|tx| (id.clone(), tx)))
                .collect()
        };

        let mut signalled = 0;
        for (job_id, tx) in senders {
            if tx.send(reason).is_ok() {
                debug!(job_id = %job_id, %reason, "stop signal delivered");
                signalled += 1;
            }
        }
        signalled
    }

    /// Drop every entry. Slots that are still alive become no-ops on drop.
    pub fn clear(&self) -> usize {
        let mut table = self.table();
        let n = table.entries.len();
        table.entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.table().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.table().entries.contains_key(job_id)
    }

    pub fn snapshot(&self) -> Vec<ActiveExecutionInfo> {
        let table = self.table();
        let mut infos: Vec<_> = table
            .entries
            .iter()
            .map(|(id, e)| ActiveExecutionInfo {
                job_id: id.clone(),
                pid: e.pid,
                started_at: e.started_at,
                deadline: e.deadline,
                stop_requested: e.stop.is_none(),
            })
            .collect();
        infos.sort_by_key(|i| i.started_at);
        infos
    }

    fn set_pid(&self, job_id: &str, token: u64, pid: Option<u32>) {
        let mut table = self.table();
        if let Some(entry) = table.entries.get_mut(job_id) {
            if entry.token == token {
                entry.pid = pid;
            }
        }
    }

    fn remove(&self, job_id: &str, token: u64) -> bool {
        let mut table = self.table();
        let owned = table
            .entries
            .get(job_id)
            .is_some_and(|e| e.token == token);
        if owned {
            table.entries.remove(job_id);
        }
        owned
    }
}

/// Ownership of one table entry for the duration of a job.
pub struct ExecutionSlot {
    job_id: JobId,
    token: u64,
    started_at: Instant,
    table: Arc<ActiveExecutions>,
    stop_rx: Option<oneshot::Receiver<StopReason>>,
}

impl std::fmt::Debug for ExecutionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionSlot")
            .field("job_id", &self.job_id)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl ExecutionSlot {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn attach_pid(&self, pid: Option<u32>) {
        self.table.set_pid(&self.job_id, self.token, pid);
    }

    /// Resolves when a stop is requested. Never resolves if the request
    /// channel is gone without a request (e.g. the table was cleared).
    pub async fn stop_requested(&mut self) -> StopReason {
        let Some(rx) = self.stop_rx.as_mut() else {
            return std::future::pending().await;
        };

        match rx.await {
            Ok(reason) => {
                self.stop_rx = None;
                reason
            }
            Err(_) => {
                self.stop_rx = None;
                std::future::pending().await
            }
        }
    }

    /// Non-blocking check, used before spawning.
    pub fn try_stop_requested(&mut self) -> Option<StopReason> {
        let rx = self.stop_rx.as_mut()?;
        match rx.try_recv() {
            Ok(reason) => {
                self.stop_rx = None;
                Some(reason)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.stop_rx = None;
                None
            }
        }
    }
}

impl Drop for ExecutionSlot {
    fn drop(&mut self) {
        if self.table.remove(&self.job_id, self.token) {
            debug!(job_id = %self.job_id, token = self.token, "removed active execution");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(60);

    #[test]
    fn slot_drop_removes_entry_once() {
        let table = Arc::new(ActiveExecutions::new());
        let slot = table.register("job-1", TIMEOUT).unwrap();
        assert!(table.contains("job-1"));
        assert!(table.register("job-1", TIMEOUT).is_none());

        drop(slot);
        assert!(table.is_empty());
    }

    #[test]
    fn stale_slot_does_not_remove_newer_entry() {
        let table = Arc::new(ActiveExecutions::new());
        let old = table.register("job-1", TIMEOUT).unwrap();

        table.clear();
        let new = table.register("job-1", TIMEOUT).unwrap();

        drop(old);
        assert!(table.contains("job-1"));
        drop(new);
        assert!(table.is_empty());
    }

    #[test]
    fn stop_is_delivered_once() {
        let table = Arc::new(ActiveExecutions::new());
        let mut slot = table.register("job-1", TIMEOUT).unwrap();

        assert!(table.stop("job-1", StopReason::Cancelled));
        assert!(!table.stop("job-1", StopReason::Cancelled));
        assert_eq!(table.stop_all(StopReason::Shutdown), 0);

        assert_eq!(slot.try_stop_requested(), Some(StopReason::Cancelled));
        assert!(table.snapshot()[0].stop_requested);
        assert!(!table.stop("unknown", StopReason::Cancelled));
    }

    #[tokio::test]
    async fn stop_all_reaches_every_slot() {
        let table = Arc::new(ActiveExecutions::new());
        let mut a = table.register("a", TIMEOUT).unwrap();
        let mut b = table.register("b", TIMEOUT).unwrap();
        a.attach_pid(Some(42));

        assert_eq!(table.stop_all(StopReason::Shutdown), 2);
        assert_eq!(a.stop_requested().await, StopReason::Shutdown);
        assert_eq!(b.stop_requested().await, StopReason::Shutdown);
        assert_eq!(table.snapshot().iter().find(|i| i.job_id == "a").unwrap().pid, Some(42));
    }
}
