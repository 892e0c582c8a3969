//! Scheduler behavior: spawning, interleaving, and task-table limits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use strand::executor::MAX_TASKS;
use strand::Runtime;

#[test]
fn block_on_returns_the_root_futures_value() {
    let runtime = Runtime::new().expect("runtime init");
    let value = runtime.block_on(async { 7 });
    assert_eq!(value, 7);
}

#[test]
fn spawned_task_runs_and_wakes_the_root_future() {
    let runtime = Runtime::new().expect("runtime init");
    let value = runtime.block_on(async {
        let (tx, rx) = oneshot::channel();
        strand::spawn(async move {
            let _ = tx.send(42);
        })
        .expect("spawn");
        rx.await.expect("task reply")
    });
    assert_eq!(value, 42);
}

#[test]
fn many_tasks_interleave_on_one_thread() {
    let runtime = Runtime::new().expect("runtime init");
    let ran = Arc::new(AtomicUsize::new(0));

    runtime.block_on(async {
        let mut done = Vec::new();
        for _ in 0..500 {
            let (tx, rx) = oneshot::channel();
            let ran = ran.clone();
            strand::spawn(async move {
                ran.fetch_add(1, Ordering::Relaxed);
                let _ = tx.send(());
            })
            .expect("spawn");
            done.push(rx);
        }
        for rx in done {
            rx.await.expect("task completion");
        }
    });

    assert_eq!(ran.load(Ordering::Relaxed), 500);
}

#[test]
fn task_handle_observes_completion() {
    let runtime = Runtime::new().expect("runtime init");
    let (tx, rx) = oneshot::channel();
    let handle = runtime
        .spawn(async move {
            let _ = tx.send(());
        })
        .expect("spawn");

    assert!(!handle.is_finished());
    runtime.block_on(async {
        rx.await.expect("task completion");
    });
    assert!(handle.is_finished());
}

#[test]
fn spawn_fails_once_the_task_table_is_full() {
    let runtime = Runtime::new().expect("runtime init");

    // Fill the table without ever running the scheduler; admitted tasks stay queued.
    let handles: Vec<_> = (0..MAX_TASKS)
        .map(|_| runtime.spawn(std::future::pending()).expect("spawn within cap"))
        .collect();
    assert_eq!(handles.len(), MAX_TASKS);
    assert!(handles.windows(2).all(|pair| pair[0].id() < pair[1].id()));

    let err = runtime
        .spawn(std::future::pending())
        .expect_err("table exhausted");
    assert!(err.to_string().contains("task table exhausted"));
}
