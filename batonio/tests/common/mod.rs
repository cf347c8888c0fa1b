#![allow(dead_code)]

use batonio::EventLoop;

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Installs a test-friendly `tracing` subscriber once per binary.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

pub fn current_loop() -> EventLoop {
    EventLoop::current().expect("test body runs inside an event loop")
}

/// Accepts one connection on a helper thread and hands it to `peer`.
pub fn serve_once<T, F>(peer: F) -> (SocketAddr, JoinHandle<T>)
where
    F: FnOnce(TcpStream) -> T + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("Failed to accept connection");
        peer(stream)
    });

    (addr, handle)
}

/// An address on this host that refuses connections.
pub fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    listener.local_addr().expect("Failed to get local address")
}

/// A listener whose accept queue is full, so new SYNs are dropped and
/// connects to it hang until their timeout.
///
/// Keep the returned streams alive for as long as the queue must stay
/// full.
#[cfg(target_os = "linux")]
pub fn saturated_listener() -> (TcpListener, Vec<TcpStream>, SocketAddr) {
    use std::net::Ipv4Addr;
    use std::os::fd::FromRawFd;

    // SAFETY: plain socket syscalls on a descriptor owned by this function
    // until it is handed to `TcpListener`.
    let listener = unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0);
        assert!(fd >= 0, "Failed to create socket");

        let mut addr: libc::sockaddr_in = std::mem::zeroed();
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_addr.s_addr = u32::from(Ipv4Addr::LOCALHOST).to_be();
        addr.sin_port = 0;

        let rc = libc::bind(
            fd,
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        );
        assert_eq!(rc, 0, "Failed to bind listener");
        assert_eq!(libc::listen(fd, 0), 0, "Failed to listen");

        TcpListener::from_raw_fd(fd)
    };

    let addr = listener.local_addr().expect("Failed to get local address");

    // Backlog 0 holds one pending connection; the next SYN is dropped.
    let mut fillers = Vec::new();
    for _ in 0..3 {
        match TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
            Ok(stream) => fillers.push(stream),
            Err(_) => break,
        }
    }

    (listener, fillers, addr)
}
