//! Deadline and close semantics of the TCP primitives.

use std::io::{ErrorKind, Read};
use std::net::TcpStream as StdTcpStream;
use std::thread;
use std::time::{Duration, Instant};

use strand::net::TcpListener;
use strand::Runtime;

#[test]
fn accept_times_out_when_nobody_connects() {
    let runtime = Runtime::new().expect("runtime init");
    runtime.block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0".parse().expect("addr")).expect("bind");

        let timeout = Duration::from_millis(200);
        let start = Instant::now();
        let err = listener.accept(Some(timeout)).await.expect_err("no peer");

        assert_eq!(err.kind(), ErrorKind::TimedOut);
        assert!(start.elapsed() >= timeout);
    });
}

#[test]
fn read_times_out_when_the_peer_stays_silent() {
    let runtime = Runtime::new().expect("runtime init");
    runtime.block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0".parse().expect("addr")).expect("bind");
        let addr = listener.local_addr().expect("local addr");

        // Connect and hold the socket open without sending.
        let client = thread::spawn(move || {
            let peer = StdTcpStream::connect(addr).expect("connect");
            thread::sleep(Duration::from_secs(1));
            drop(peer);
        });

        let (stream, _) = listener.accept(None).await.expect("accept");

        let timeout = Duration::from_millis(200);
        let start = Instant::now();
        let mut buf = [0u8; 64];
        let err = stream.read(&mut buf, timeout).await.expect_err("silent peer");

        assert_eq!(err.kind(), ErrorKind::TimedOut);
        assert!(start.elapsed() >= timeout);

        client.join().expect("client thread");
    });
}

#[test]
fn closing_twice_is_a_noop_and_later_io_reports_not_connected() {
    let runtime = Runtime::new().expect("runtime init");
    runtime.block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0".parse().expect("addr")).expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let client = thread::spawn(move || StdTcpStream::connect(addr).expect("connect"));
        let (mut stream, accepted_addr) = listener.accept(None).await.expect("accept");
        let peer = client.join().expect("client thread");

        assert_eq!(
            stream.peer_addr().expect("peer addr"),
            peer.local_addr().expect("client local addr"),
        );
        assert_eq!(stream.peer_addr().expect("peer addr"), accepted_addr);

        stream.close();
        stream.close();

        let err = stream.peer_addr().expect_err("closed handle");
        assert_eq!(err.kind(), ErrorKind::NotConnected);

        let mut buf = [0u8; 8];
        let err = stream
            .read(&mut buf, Duration::from_millis(50))
            .await
            .expect_err("closed handle");
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        // Drop closes a third time; still a no-op.
    });
}

#[test]
fn read_returns_zero_when_the_peer_closes_first() {
    let runtime = Runtime::new().expect("runtime init");
    runtime.block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0".parse().expect("addr")).expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let client = thread::spawn(move || {
            drop(StdTcpStream::connect(addr).expect("connect"));
        });

        let (stream, _) = listener.accept(None).await.expect("accept");
        client.join().expect("client thread");

        let mut buf = [0u8; 64];
        let n = stream
            .read(&mut buf, Duration::from_secs(1))
            .await
            .expect("read after close");
        assert_eq!(n, 0);
    });
}

#[test]
fn write_all_sends_a_buffer_larger_than_the_socket_buffer() {
    let runtime = Runtime::new().expect("runtime init");
    runtime.block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0".parse().expect("addr")).expect("bind");
        let addr = listener.local_addr().expect("local addr");

        const LEN: usize = 1 << 20;
        let client = thread::spawn(move || {
            let mut peer = StdTcpStream::connect(addr).expect("connect");
            // Delay reading so the writer has to suspend on writability.
            thread::sleep(Duration::from_millis(100));
            let mut received = Vec::new();
            peer.read_to_end(&mut received).expect("drain");
            received
        });

        let (mut stream, _) = listener.accept(None).await.expect("accept");
        let payload = vec![0xA5u8; LEN];
        let written = stream
            .write_all(&payload, Duration::from_secs(5))
            .await
            .expect("write all");
        assert_eq!(written, LEN);
        stream.close();

        let received = client.join().expect("client thread");
        assert_eq!(received.len(), LEN);
        assert!(received.iter().all(|&b| b == 0xA5));
    });
}
