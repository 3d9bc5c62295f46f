#![cfg(unix)]

use std::sync::Arc;

use taskvisor::engine::Worker;
use taskvisor::errors::FailureKind;
use taskvisor::exec::Supervisor;
use taskvisor::queue::{InMemoryQueue, JobStatus};
use taskvisor_test_utils::builders::{ConfigFileBuilder, PayloadBuilder};
use taskvisor_test_utils::script::{ScriptBuilder, ScriptDir};
use taskvisor_test_utils::{init_tracing, wait_until, with_timeout};

#[tokio::test]
async fn jobs_run_to_completion_and_leave_no_active_executions() {
    init_tracing();
    let dir = ScriptDir::new();
    let script = ScriptBuilder::new()
        .emit(r#"{"event":"run_started"}"#)
        .emit(r#"{"event":"stream","payload":{"type":"text","content":"hello"}}"#)
        .emit(r#"{"event":"run_completed"}"#)
        .write(&dir, "hello.sh");

    let cfg = ConfigFileBuilder::new().script(&script).concurrency(2).build();
    let queue = Arc::new(InMemoryQueue::from_config(cfg.queue()));
    let ids: Vec<_> = (0..5)
        .map(|i| queue.add(PayloadBuilder::new(&format!("job {i}")).cwd(dir.path()).build()))
        .collect();
    queue.close_when_drained();

    let backend = Arc::new(Supervisor::from_config(cfg.worker()));
    let worker = Worker::start(Arc::clone(&queue), backend, &cfg);
    with_timeout(worker.wait()).await;

    for id in &ids {
        let record = queue.record(id).unwrap();
        assert_eq!(record.status, JobStatus::Succeeded, "{record:?}");
        assert_eq!(record.progress, 100);
        assert_eq!(record.progress_history, vec![0, 20, 25, 100]);
        assert_eq!(record.result.as_ref().unwrap().output, "hello");
    }
    assert!(worker.active().is_empty());
    assert!(queue.is_closed());
}

#[tokio::test]
async fn cancelled_job_is_marked_cancelled_and_signalled_once() {
    init_tracing();
    let dir = ScriptDir::new();
    let signals = dir.file("signals.log");
    let script = ScriptBuilder::new()
        .trap_term(&signals)
        .emit(r#"{"event":"run_started"}"#)
        .emit(r#"{"event":"stream","payload":{"type":"text","content":"working"}}"#)
        .idle()
        .write(&dir, "long.sh");

    let cfg = ConfigFileBuilder::new().script(&script).grace_ms(500).build();
    let queue = Arc::new(InMemoryQueue::from_config(cfg.queue()));
    let id = queue.add(PayloadBuilder::new("long").cwd(dir.path()).build());

    let backend = Arc::new(Supervisor::from_config(cfg.worker()));
    let worker = Worker::start(Arc::clone(&queue), backend, &cfg);

    wait_until("the job streamed output", || {
        queue
            .record(&id)
            .is_some_and(|r| r.progress_history.contains(&25))
    })
    .await;

    assert!(worker.cancel(&id));
    wait_until("the job is cancelled", || {
        queue
            .record(&id)
            .is_some_and(|r| r.status == JobStatus::Cancelled)
    })
    .await;

    let record = queue.record(&id).unwrap();
    let failure = record.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert!(!failure.retryable);
    assert_eq!(dir.line_count("signals.log"), 1);
    assert!(worker.active().is_empty());
    assert!(!worker.cancel(&id));

    with_timeout(worker.shutdown()).await;
}

#[tokio::test]
async fn shutdown_twice_is_the_same_as_once() {
    init_tracing();
    let dir = ScriptDir::new();
    let signals = dir.file("signals.log");
    let script = ScriptBuilder::new()
        .trap_term(&signals)
        .emit(r#"{"event":"run_started"}"#)
        .idle()
        .write(&dir, "idle.sh");

    let cfg = ConfigFileBuilder::new()
        .script(&script)
        .concurrency(2)
        .grace_ms(500)
        .build();
    let queue = Arc::new(InMemoryQueue::from_config(cfg.queue()));
    let ids: Vec<_> = (0..2)
        .map(|i| queue.add(PayloadBuilder::new(&format!("idle {i}")).cwd(dir.path()).build()))
        .collect();

    let backend = Arc::new(Supervisor::from_config(cfg.worker()));
    let worker = Worker::start(Arc::clone(&queue), backend, &cfg);

    wait_until("both jobs started", || {
        ids.iter().all(|id| {
            queue
                .record(id)
                .is_some_and(|r| r.progress_history.contains(&20))
        })
    })
    .await;
    assert_eq!(worker.active().len(), 2);

    let (first, second) = with_timeout(async { tokio::join!(worker.shutdown(), worker.shutdown()) }).await;
    assert_eq!(first + second, 2);
    assert_eq!(with_timeout(worker.shutdown()).await, 0);

    assert!(worker.is_draining());
    assert!(worker.active().is_empty());
    assert!(queue.is_closed());
    assert_eq!(dir.line_count("signals.log"), 2);

    for id in &ids {
        let record = queue.record(id).unwrap();
        assert_eq!(record.status, JobStatus::Cancelled, "{record:?}");
        let failure = record.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Cancelled);
        // Interrupted by shutdown, not by a user: another worker may retry it.
        assert!(failure.retryable);
    }
}
