//! The cooperative runtime tying the executor and reactor together.
//!
//! Unlike a multi-threaded runtime, everything here runs on the thread that calls
//! [`Runtime::block_on`]: that one loop polls the root future, drains the run queue,
//! then blocks in the OS event poller bounded by the earliest pending deadline. Handles
//! to the executor and reactor live in thread-local storage so spawning and socket
//! registration work from anywhere inside the running tasks.

use std::cell::RefCell;
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::Context;

use mio::{Events, Poll};
use tracing::info;

use crate::executor::{Executor, ExecutorHandle};
use crate::reactor::Reactor;
use crate::task::TaskHandle;
use crate::waker;

thread_local! {
    static HANDLE: OnceLock<Arc<ExecutorHandle>> = const { OnceLock::new() };
    static REACTOR: OnceLock<Arc<Reactor>> = const { OnceLock::new() };
}

/// The single-threaded cooperative runtime.
pub struct Runtime {
    /// The run-queue handle shared with wakers.
    handle: Arc<ExecutorHandle>,
    /// The I/O reactor shared with socket handles.
    reactor: Arc<Reactor>,
    /// The OS event poller, used exclusively by the scheduler loop.
    poll: RefCell<Poll>,
}

impl Runtime {
    /// Creates a new runtime and enters its context on the current thread.
    ///
    /// Setting `STRAND_METRICS` in the environment additionally installs a Prometheus
    /// exporter on port 9000 for the runtime's task-lifecycle metrics.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the event-notification backend cannot be allocated.
    pub fn new() -> io::Result<Self> {
        if std::env::var_os("STRAND_METRICS").is_some() {
            let port = 9000;
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], port))
                .install()
                .map_err(io::Error::other)?;
            info!(port, "metrics exporter listening");
        }

        let (reactor, poll) = Reactor::new()?;
        let handle = Executor::new(&reactor.registry)?;

        let runtime = Self {
            handle,
            reactor,
            poll: RefCell::new(poll),
        };
        runtime.enter();

        Ok(runtime)
    }

    /// Stores the executor and reactor handles in thread-local storage.
    ///
    /// This must happen before any task spawning or socket registration on this thread.
    pub fn enter(&self) {
        HANDLE.with(|h| {
            let _ = h.set(self.handle.clone());
        });
        REACTOR.with(|r| {
            let _ = r.set(self.reactor.clone());
        });
    }

    /// Registers a new task; it runs once the scheduler loop next drains the run queue.
    ///
    /// # Errors
    ///
    /// Fails when the task table is exhausted. The failure is confined to this spawn:
    /// the future is dropped (releasing any socket it captured) and the scheduler keeps
    /// running.
    pub fn spawn<F>(&self, future: F) -> io::Result<TaskHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = self.handle.admit(Box::pin(future))?;
        Ok(TaskHandle::new(task))
    }

    /// Drives `future` and every spawned task on the current thread until `future`
    /// completes.
    ///
    /// This is the scheduler's one driving loop: run whatever is runnable, one task at
    /// a time, then block in the event poller until a socket becomes ready or the
    /// earliest pending deadline elapses, and wake the tasks concerned.
    ///
    /// # Panics
    ///
    /// Panics on an unrecoverable event-poll failure (interruptions are retried), and
    /// when called reentrantly from inside a running task.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let mut future = Box::pin(future);

        let woken = Arc::new(AtomicBool::new(true));
        let root_waker = waker::root_waker(woken.clone(), self.handle.clone());
        let mut cx = Context::from_waker(&root_waker);

        let mut poll = self
            .poll
            .try_borrow_mut()
            .expect("strand: nested block_on is not supported");
        let mut events = Events::with_capacity(1024);

        loop {
            if woken.swap(false, Ordering::AcqRel) {
                if let std::task::Poll::Ready(out) = future.as_mut().poll(&mut cx) {
                    return out;
                }
            }

            ExecutorHandle::run_ready(&self.handle);

            // Running tasks may have woken the root future or each other; loop around
            // before we commit to sleeping.
            if woken.load(Ordering::Acquire) || self.handle.has_ready() {
                continue;
            }

            // Everything is suspended. Block until readiness or the earliest deadline.
            let timeout = self.reactor.next_timeout();
            if let Err(e) = poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                panic!("strand: event poll failed: {e}");
            }

            self.reactor.dispatch(&events);
            self.reactor.fire_expired();
        }
    }

    /// Runs the scheduler forever; the server's driving call.
    pub fn run_forever(&self) -> ! {
        let never: Infallible = self.block_on(std::future::pending());
        match never {}
    }
}

/// Spawns a future from within an active runtime context.
///
/// # Errors
///
/// Fails when the task table is exhausted; the future is dropped.
///
/// # Panics
///
/// Panics if called outside of a runtime context.
pub fn spawn<F>(future: F) -> io::Result<TaskHandle>
where
    F: Future<Output = ()> + Send + 'static,
{
    HANDLE.with(|h| {
        let handle = h
            .get()
            .expect("strand: spawn called outside of a runtime context");
        let task = handle.admit(Box::pin(future))?;
        Ok(TaskHandle::new(task))
    })
}

/// Retrieves the current runtime's reactor from thread-local storage.
///
/// Socket handles capture this at creation to register themselves and to park wakers
/// and deadlines while suspended.
///
/// # Panics
///
/// Panics if called outside of a runtime context.
pub(crate) fn get_reactor() -> Arc<Reactor> {
    REACTOR.with(|r| {
        r.get()
            .cloned()
            .expect("strand: I/O type used outside of a runtime context")
    })
}
