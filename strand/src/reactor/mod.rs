//! Event-driven I/O reactor.
//!
//! The reactor uses system-level event notification (e.g., epoll on Linux, kqueue on
//! macOS) to detect when sockets become ready and wakes the tasks suspended on them.
//! It also tracks per-operation deadlines so a suspended task is woken when its timeout
//! elapses, whichever comes first.

use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Waker;
use std::time::{Duration, Instant};

/// Reserved token for the executor's poll-interrupt waker; socket tokens start above it.
pub(crate) const WAKE_TOKEN: Token = Token(0);

/// Manages I/O readiness events and deadlines for suspended tasks.
///
/// # Architecture
///
/// - **Registry**: central collection point where sockets are registered for monitoring
/// - **Waker table**: maps event tokens to the wakers of the tasks suspended on them
/// - **Deadline heap**: earliest-first queue of (deadline, token) pairs driving the
///   timeout bound of each wait-for-readiness call
#[derive(Debug)]
pub struct Reactor {
    // Cloned registry so I/O handles can register their sockets.
    pub(crate) registry: Registry,
    wakers: Mutex<HashMap<Token, Waker>>,
    deadlines: Mutex<BinaryHeap<Reverse<(Instant, Token)>>>,
    next_token: AtomicUsize,
}

impl Reactor {
    /// Creates a new reactor with a poll instance.
    ///
    /// Returns the reactor (shared ownership) together with the OS-level event poller,
    /// which the scheduler loop keeps for itself.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the event-notification backend cannot be allocated.
    pub fn new() -> io::Result<(Arc<Self>, Poll)> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let reactor = Arc::new(Self {
            registry,
            wakers: Mutex::new(HashMap::new()),
            deadlines: Mutex::new(BinaryHeap::new()),
            next_token: AtomicUsize::new(WAKE_TOKEN.0 + 1),
        });

        Ok((reactor, poll))
    }

    /// Registers a socket for the given interest and allocates its token.
    pub(crate) fn register<S: Source>(
        &self,
        source: &mut S,
        interests: Interest,
    ) -> io::Result<Token> {
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.registry.register(source, token, interests)?;
        Ok(token)
    }

    /// Removes a socket from the poller and drops any waker still parked on its token.
    pub(crate) fn deregister<S: Source>(&self, source: &mut S, token: Token) -> io::Result<()> {
        self.wakers.lock().unwrap().remove(&token);
        self.registry.deregister(source)
    }

    /// Associates a waker with a token for the next readiness event or deadline.
    ///
    /// At most one waker is parked per token: each socket is owned by exactly one task,
    /// and that task has at most one I/O operation in flight.
    pub(crate) fn add_waker(&self, token: Token, waker: Waker) {
        let mut wakers = self.wakers.lock().unwrap();
        wakers.insert(token, waker);
    }

    /// Arms a deadline for the operation currently suspended on `token`.
    ///
    /// Entries are not removed when the operation completes early; a stale entry fires
    /// into an empty waker slot (or spuriously wakes a later operation on the same
    /// socket, which re-checks its own deadline and suspends again).
    pub(crate) fn set_deadline(&self, token: Token, at: Instant) {
        let mut deadlines = self.deadlines.lock().unwrap();
        deadlines.push(Reverse((at, token)));
    }

    /// Time until the earliest pending deadline, or `None` when no deadline is armed.
    ///
    /// This bounds how long the scheduler may block waiting for readiness.
    pub(crate) fn next_timeout(&self) -> Option<Duration> {
        let deadlines = self.deadlines.lock().unwrap();
        let Reverse((at, _)) = deadlines.peek()?;
        Some(at.saturating_duration_since(Instant::now()))
    }

    /// Wakes every task whose socket was reported ready.
    pub(crate) fn dispatch(&self, events: &Events) {
        for event in events.iter() {
            let token = event.token();
            if token == WAKE_TOKEN {
                // The poll-interrupt channel; the run queue already holds the work.
                continue;
            }
            let mut wakers = self.wakers.lock().unwrap();
            if let Some(waker) = wakers.remove(&token) {
                waker.wake();
            }
        }
    }

    /// Wakes every task whose deadline has elapsed.
    ///
    /// The woken operation distinguishes a deadline wake from a readiness wake by
    /// retrying its syscall: if it still would block and its deadline has passed, it
    /// fails with `TimedOut`.
    pub(crate) fn fire_expired(&self) {
        let now = Instant::now();
        let mut deadlines = self.deadlines.lock().unwrap();
        while let Some(Reverse((at, token))) = deadlines.peek().copied() {
            if at > now {
                break;
            }
            deadlines.pop();
            let mut wakers = self.wakers.lock().unwrap();
            if let Some(waker) = wakers.remove(&token) {
                waker.wake();
            }
        }
    }
}
