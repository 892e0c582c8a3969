//! Task admission and the scheduler's run queue.
//!
//! The executor owns the queue of runnable tasks. Exactly one thread (the one inside
//! [`Runtime::block_on`](crate::runtime::Runtime::block_on)) ever polls tasks, so
//! concurrency comes purely from interleaving at suspension points; the queue itself is
//! lock-free because wakers may push onto it from other threads.

use crate::reactor::WAKE_TOKEN;
use crate::task::{Task, TaskFuture};
use crossbeam_queue::SegQueue;
use metrics::{counter, gauge};
use mio::Registry;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Hard cap on live tasks; `spawn` fails once the table is full.
pub const MAX_TASKS: usize = 16_384;

#[derive(Debug)]
pub struct ExecutorHandle {
    /// Runnable tasks, in wake order.
    injector: SegQueue<Arc<Task>>,
    /// Interrupts a blocked event-poll when a wake arrives from another thread.
    poll_waker: mio::Waker,
    /// Number of live (spawned, not yet completed) tasks.
    active: AtomicUsize,
    /// Next task identifier.
    next_id: AtomicUsize,
}

impl ExecutorHandle {
    /// Creates a task for `future` and marks it runnable, enforcing the task-table cap.
    ///
    /// Failure is signaled to the caller and is not fatal to the scheduler; the future
    /// is dropped, releasing whatever resources it captured.
    pub(crate) fn admit(&self, future: TaskFuture) -> io::Result<Arc<Task>> {
        let mut active = self.active.load(Ordering::Relaxed);
        loop {
            if active >= MAX_TASKS {
                return Err(io::Error::other("strand: task table exhausted"));
            }
            match self.active.compare_exchange_weak(
                active,
                active + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => active = current,
            }
        }

        // Track total throughput of the system
        counter!("strand_tasks_spawned_total").increment(1);
        gauge!("strand_tasks_pending_current").increment(1.0);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = Task::new(id, future);
        self.enqueue(task.clone());
        Ok(task)
    }

    /// Marks a task runnable.
    pub(crate) fn enqueue(&self, task: Arc<Task>) {
        self.injector.push(task);
        self.interrupt();
    }

    /// Breaks the scheduler out of a blocked wait-for-readiness call.
    pub(crate) fn interrupt(&self) {
        // Failure here only delays a wakeup until the next poll timeout.
        let _ = self.poll_waker.wake();
    }

    /// Runs every currently runnable task to its next suspension point or completion,
    /// strictly one at a time.
    pub(crate) fn run_ready(handle: &Arc<ExecutorHandle>) {
        while let Some(task) = handle.injector.pop() {
            task.poll(handle);
        }
    }

    pub(crate) fn task_finished(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        gauge!("strand_tasks_pending_current").decrement(1.0);
    }

    pub(crate) fn has_ready(&self) -> bool {
        !self.injector.is_empty()
    }
}

pub struct Executor;

impl Executor {
    /// Builds the run queue and its poll-interrupt channel on the given registry.
    pub fn new(registry: &Registry) -> io::Result<Arc<ExecutorHandle>> {
        let poll_waker = mio::Waker::new(registry, WAKE_TOKEN)?;
        Ok(Arc::new(ExecutorHandle {
            injector: SegQueue::new(),
            poll_waker,
            active: AtomicUsize::new(0),
            next_id: AtomicUsize::new(0),
        }))
    }
}
