use futures::future::BoxFuture;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::executor::ExecutorHandle;
use crate::waker;

const IDLE: u8 = 0;
const POLLING: u8 = 1;
const COMPLETED: u8 = 2;

/// A pinned, heap-allocated future that produces no output.
///
/// `Pin` guarantees that the future's data will not be moved in memory, which is
/// essential for futures that contain self-referential data. While the `Box` container
/// itself can be moved, the data within it remains at a stable heap address.
pub type TaskFuture = BoxFuture<'static, ()>;

/// An independent logical thread of control managed by the scheduler.
///
/// A `Task` wraps a future and tracks its execution state. The future pointer and state
/// are atomic because wakers (and therefore re-enqueues) may fire from outside the
/// scheduler thread, even though polling itself only ever happens on that one thread.
#[derive(Debug)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: usize,
    /// Current execution state of the task (idle, polling, or completed).
    state: AtomicU8,
    /// Raw pointer to the boxed future; null while the task is being polled or after
    /// it has completed.
    future: AtomicPtr<TaskFuture>,
}

impl Task {
    /// Creates a new task from a future.
    pub(crate) fn new(id: usize, future: TaskFuture) -> Arc<Self> {
        // Convert the future into a raw pointer, consuming the Box while preserving
        // the heap allocation.
        let ptr = Box::into_raw(Box::new(future));

        Arc::new(Self {
            id,
            state: AtomicU8::new(IDLE),
            future: AtomicPtr::new(ptr),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMPLETED
    }

    /// Polls the task's future to its next suspension point or to completion.
    ///
    /// Takes the future pointer out of the task for the duration of the poll. A wake
    /// that fires mid-poll simply re-enqueues the task; by the time the queue entry is
    /// popped again the pointer has been restored, so the wakeup is never lost. A wake
    /// that arrives after completion finds a null pointer and is ignored.
    pub(crate) fn poll(self: Arc<Self>, handle: &Arc<ExecutorHandle>) {
        let ptr = self.future.swap(ptr::null_mut(), Ordering::AcqRel);
        if ptr.is_null() {
            // Already completed, or a duplicate queue entry for a task whose real
            // entry was processed first.
            return;
        }
        self.state.store(POLLING, Ordering::Release);

        let waker = waker::task_waker(self.clone(), handle.clone());
        let mut cx = Context::from_waker(&waker);

        // SAFETY: the pointer came from Box::into_raw in `new` and was swapped out
        // above, so this is the only live reference to the future.
        let future = unsafe { &mut *ptr };
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                self.state.store(COMPLETED, Ordering::Release);
                // SAFETY: reclaims the allocation taken out above; the pointer is
                // never restored, so no other path can free it again.
                unsafe { drop(Box::from_raw(ptr)) };
                handle.task_finished();
            }
            Poll::Pending => {
                self.future.store(ptr, Ordering::Release);
                self.state.store(IDLE, Ordering::Release);
            }
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        // Atomically replace the future pointer with null; AcqRel synchronizes with
        // any waker thread that observed the task before the last Arc was dropped.
        let ptr = self.future.swap(ptr::null_mut(), Ordering::AcqRel);
        if !ptr.is_null() {
            unsafe {
                drop(Box::from_raw(ptr));
            }
        }
    }
}

/// Handle returned by `spawn`, identifying the new task.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    task: Arc<Task>,
}

impl TaskHandle {
    pub(crate) fn new(task: Arc<Task>) -> Self {
        Self { task }
    }

    pub fn id(&self) -> usize {
        self.task.id
    }

    /// Whether the task's entry future has run to completion.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
