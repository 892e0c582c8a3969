//! Readiness-driven TCP primitives.
//!
//! [`TcpListener`] and [`TcpStream`] wrap non-blocking sockets registered with the
//! reactor. Their operations are leaf futures: each poll attempts the syscall first and
//! only suspends on `WouldBlock`, parking the task's waker (and an optional deadline)
//! at the reactor. A deadline wake is told apart from a readiness wake by retrying the
//! syscall: if it still would block past the deadline, the operation fails with
//! [`io::ErrorKind::TimedOut`].
//!
//! Handles are owned values. Moving one into a spawned task transfers the socket with
//! it, so a socket can never be awaited by two tasks at once.

use mio::{Interest, Token};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use crate::reactor::Reactor;
use crate::runtime;

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket handle already closed")
}

/// Suspends the current operation until `token` is ready or `deadline` elapses.
fn park(reactor: &Reactor, token: Token, deadline: Option<Instant>, cx: &Context<'_>) {
    reactor.add_waker(token, cx.waker().clone());
    if let Some(at) = deadline {
        reactor.set_deadline(token, at);
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|at| Instant::now() >= at)
}

fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{what} deadline elapsed"))
}

/// A listening socket owned by the task that accepts connections.
#[derive(Debug)]
pub struct TcpListener {
    inner: Option<mio::net::TcpListener>,
    token: Token,
    reactor: Arc<Reactor>,
}

impl TcpListener {
    /// Wraps an already-created listening socket and registers it with the reactor.
    ///
    /// The socket is forced into non-blocking mode. Must be called from within a
    /// runtime context.
    pub fn from_std(listener: std::net::TcpListener) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let mut net = mio::net::TcpListener::from_std(listener);

        let reactor = runtime::get_reactor();
        let token = reactor.register(&mut net, Interest::READABLE)?;

        Ok(Self {
            inner: Some(net),
            token,
            reactor,
        })
    }

    /// Binds a new listening socket on `addr` and registers it with the reactor.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let mut net = mio::net::TcpListener::bind(addr)?;

        let reactor = runtime::get_reactor();
        let token = reactor.register(&mut net, Interest::READABLE)?;

        Ok(Self {
            inner: Some(net),
            token,
            reactor,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.as_ref().ok_or_else(closed)?.local_addr()
    }

    /// Suspends until a connection is pending, or until `timeout` elapses if given.
    ///
    /// Transient accept failures (interrupted call, connection aborted before accept)
    /// are retried internally and never surfaced. The accepted stream is registered
    /// for read and write readiness before being returned.
    pub async fn accept(&self, timeout: Option<Duration>) -> io::Result<(TcpStream, SocketAddr)> {
        let deadline = timeout.map(|t| Instant::now() + t);
        AcceptFuture {
            listener: self,
            deadline,
        }
        .await
    }

    /// Releases the listening socket. Idempotent: closing twice is a no-op.
    pub fn close(&mut self) {
        if let Some(mut net) = self.inner.take() {
            let _ = self.reactor.deregister(&mut net, self.token);
        }
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        self.close();
    }
}

/// The leaf future for accept.
struct AcceptFuture<'a> {
    listener: &'a TcpListener,
    deadline: Option<Instant>,
}

impl Future for AcceptFuture<'_> {
    type Output = io::Result<(TcpStream, SocketAddr)>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(net) = self.listener.inner.as_ref() else {
            return Poll::Ready(Err(closed()));
        };

        loop {
            match net.accept() {
                Ok((mut stream, addr)) => {
                    let reactor = self.listener.reactor.clone();
                    let token =
                        reactor.register(&mut stream, Interest::READABLE | Interest::WRITABLE)?;
                    return Poll::Ready(Ok((
                        TcpStream {
                            inner: Some(stream),
                            token,
                            reactor,
                        },
                        addr,
                    )));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if expired(self.deadline) {
                        return Poll::Ready(Err(timed_out("accept")));
                    }
                    park(&self.listener.reactor, self.listener.token, self.deadline, cx);
                    return Poll::Pending;
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::Interrupted
                        || e.kind() == io::ErrorKind::ConnectionAborted =>
                {
                    // Spurious failure; the connection is gone but the listener is fine.
                    continue;
                }
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }
}

/// One accepted connection, owned by its handler task.
#[derive(Debug)]
pub struct TcpStream {
    inner: Option<mio::net::TcpStream>,
    token: Token,
    reactor: Arc<Reactor>,
}

impl TcpStream {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.as_ref().ok_or_else(closed)?.peer_addr()
    }

    /// Suspends until at least one byte is available, the peer closes (returns 0), or
    /// `timeout` elapses.
    ///
    /// A single call returns whatever one readiness wake-up produced, capped at
    /// `buf.len()`.
    pub async fn read(&self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let deadline = Instant::now() + timeout;
        ReadFuture {
            stream: self,
            buf,
            deadline,
        }
        .await
    }

    /// Writes the whole of `buf`, suspending across writable-readiness wake-ups as
    /// needed, until everything is sent or `timeout` elapses.
    ///
    /// All-or-error: on success the returned count always equals `buf.len()`.
    pub async fn write_all(&self, buf: &[u8], timeout: Duration) -> io::Result<usize> {
        let deadline = Instant::now() + timeout;
        WriteFuture {
            stream: self,
            buf,
            written: 0,
            deadline,
        }
        .await
    }

    /// Releases the socket. Idempotent: closing twice is a no-op.
    pub fn close(&mut self) {
        if let Some(mut net) = self.inner.take() {
            let _ = self.reactor.deregister(&mut net, self.token);
        }
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// The leaf future for read.
struct ReadFuture<'a> {
    stream: &'a TcpStream,
    buf: &'a mut [u8],
    deadline: Instant,
}

impl Future for ReadFuture<'_> {
    type Output = io::Result<usize>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let Some(net) = this.stream.inner.as_ref() else {
            return Poll::Ready(Err(closed()));
        };

        loop {
            use std::io::Read;
            // Shared-reference read; mio sockets are plain fds underneath.
            match (&*net).read(this.buf) {
                Ok(n) => return Poll::Ready(Ok(n)),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= this.deadline {
                        return Poll::Ready(Err(timed_out("read")));
                    }
                    park(
                        &this.stream.reactor,
                        this.stream.token,
                        Some(this.deadline),
                        cx,
                    );
                    return Poll::Pending;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }
}

/// The leaf future for write, carrying its progress across suspensions.
struct WriteFuture<'a> {
    stream: &'a TcpStream,
    buf: &'a [u8],
    written: usize,
    deadline: Instant,
}

impl Future for WriteFuture<'_> {
    type Output = io::Result<usize>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let Some(net) = this.stream.inner.as_ref() else {
            return Poll::Ready(Err(closed()));
        };

        loop {
            use std::io::Write;
            if this.written == this.buf.len() {
                return Poll::Ready(Ok(this.written));
            }
            match (&*net).write(&this.buf[this.written..]) {
                Ok(0) => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "peer stopped accepting bytes",
                    )));
                }
                Ok(n) => this.written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= this.deadline {
                        return Poll::Ready(Err(timed_out("write")));
                    }
                    park(
                        &this.stream.reactor,
                        this.stream.token,
                        Some(this.deadline),
                        cx,
                    );
                    return Poll::Pending;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }
}
