//! A single-threaded cooperative async runtime built directly on OS readiness events.
//!
//! Many logical tasks share one OS thread: each runs until it suspends on a socket
//! operation or finishes, and is resumed by the socket becoming ready or its deadline
//! elapsing. The crate consists of:
//!
//! - [`runtime`]: The scheduler loop, task spawning, and the runtime context
//! - [`executor`]: The run queue of runnable tasks
//! - [`reactor`]: Readiness events and per-operation deadlines
//! - [`net`]: TCP primitives whose operations suspend instead of blocking
//! - [`task`]: Task state tracking
//! - [`waker`]: Waker implementations gluing readiness back to the run queue

pub mod executor;
pub mod net;
pub mod reactor;
pub mod runtime;
pub mod task;
pub mod waker;

pub use runtime::{spawn, Runtime};
pub use task::TaskHandle;

pub use strand_macros::main;
