//! Fixed-response HTTP server on the `strand` runtime.
//!
//! Accepts connections on port 8080 and answers anything that sends at least one byte
//! within five seconds with a canned `200 OK`. One task owns the listening socket; each
//! accepted connection gets its own short-lived handler task. All of them interleave on
//! a single thread through the runtime's readiness loop.

use std::convert::Infallible;
use std::io;
use std::mem::size_of;
use std::os::fd::{FromRawFd, RawFd};
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use strand::net::{TcpListener, TcpStream};

const PORT: u16 = 8080;
const BACKLOG: libc::c_int = 128;
const BUF_SIZE: usize = 4096;
const IO_TIMEOUT: Duration = Duration::from_secs(5);

const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: text/plain\r\n\
Content-Length: 13\r\n\
\r\n\
Hello, World!";

#[strand::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let socket = bind_listener(PORT).context("failed to create listening socket")?;
    let listener =
        TcpListener::from_std(socket).context("failed to register listening socket")?;
    info!(port = PORT, "listening for connections");

    strand::spawn(accept_connections(listener)).context("failed to spawn listener task")?;

    // The listener task keeps the scheduler busy for the life of the process.
    let never: Infallible = std::future::pending().await;
    match never {}
}

/// The listener task: owns the listening socket for the process lifetime.
///
/// A failed accept is logged and retried; it never takes the server down.
async fn accept_connections(listener: TcpListener) {
    loop {
        match listener.accept(None).await {
            Ok((stream, addr)) => {
                debug!(%addr, "accepted connection");
                if let Err(e) = strand::spawn(handle_client(stream)) {
                    // The dropped future closes the orphaned socket.
                    warn!(error = %e, %addr, "failed to spawn connection handler");
                }
            }
            Err(e) => warn!(error = %e, "accept failed, retrying"),
        }
    }
}

/// The handler task: consumes exactly one connection, then terminates.
async fn handle_client(mut stream: TcpStream) {
    let mut buf = [0u8; BUF_SIZE];
    match stream.read(&mut buf, IO_TIMEOUT).await {
        Ok(0) => debug!("peer closed before sending"),
        Ok(n) => {
            // The request bytes are opaque; anything at all earns the canned reply.
            debug!(bytes = n, "request received");
            if let Err(e) = stream.write_all(RESPONSE, IO_TIMEOUT).await {
                warn!(error = %e, "failed to write response");
            }
        }
        Err(e) if e.kind() == io::ErrorKind::TimedOut => debug!("read timed out"),
        Err(e) => warn!(error = %e, "read failed"),
    }
    stream.close();
}

/// Creates the listening socket from raw OS calls: `SO_REUSEADDR`, non-blocking mode,
/// bind to all interfaces, backlog of 128.
fn bind_listener(port: u16) -> io::Result<std::net::TcpListener> {
    // SAFETY: plain socket(2); the fd is closed below on any setup failure.
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    if let Err(e) = configure_listener(fd, port) {
        // SAFETY: fd came from socket(2) above and was never handed out.
        unsafe { libc::close(fd) };
        return Err(e);
    }

    // SAFETY: fd is a valid, bound, listening socket and ownership transfers here.
    Ok(unsafe { std::net::TcpListener::from_raw_fd(fd) })
}

fn configure_listener(fd: RawFd, port: u16) -> io::Result<()> {
    // SAFETY: fd is a valid socket descriptor; the sockaddr_in is fully initialized
    // and its size passed alongside.
    unsafe {
        let opt: libc::c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &opt as *const libc::c_int as *const libc::c_void,
            size_of::<libc::c_int>() as libc::socklen_t,
        ) < 0
        {
            return Err(io::Error::last_os_error());
        }

        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }

        let addr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: port.to_be(),
            sin_addr: libc::in_addr {
                s_addr: libc::INADDR_ANY.to_be(),
            },
            sin_zero: [0; 8],
        };
        if libc::bind(
            fd,
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ) < 0
        {
            return Err(io::Error::last_os_error());
        }

        if libc::listen(fd, BACKLOG) < 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}
