mod common;

use batonio::cancel::{CancellationSource, with_cancellation};
use batonio::net::SocketState;
use batonio::{BufQueue, Error, Socket};

use bytes::Bytes;
use common::{current_loop, init_logging, serve_once};
use std::io::Read;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

async fn connect(addr: std::net::SocketAddr) -> Socket {
    Socket::connect(&current_loop(), addr, Duration::from_secs(5))
        .await
        .expect("connect failed")
}

fn read_all(mut stream: std::net::TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).expect("Failed to read from stream");
    buf
}

#[batonio::test]
async fn test_write_reaches_peer() {
    init_logging();

    let (addr, handle) = serve_once(read_all);
    let socket = connect(addr).await;

    socket.write(b"hello ", Duration::from_secs(5)).await.unwrap();
    socket
        .write_bytes(Bytes::from_static(b"world"), Duration::ZERO)
        .await
        .unwrap();
    socket.close();

    assert_eq!(handle.join().expect("Thread panicked"), b"hello world");
}

#[batonio::test]
async fn test_write_queue_is_vectored_and_non_consuming() {
    init_logging();

    let (addr, handle) = serve_once(read_all);
    let socket = connect(addr).await;

    let mut queue = BufQueue::new();
    queue.append(b"alpha,");
    queue.append_bytes(Bytes::from_static(b"beta,"));
    queue.append(b"gamma");

    socket.write_queue(&mut queue, Duration::ZERO).await.unwrap();
    socket.shutdown_write();

    assert_eq!(queue.len(), 16);
    assert_eq!(handle.join().expect("Thread panicked"), b"alpha,beta,gamma");
}

#[batonio::test]
async fn test_large_write_completes() {
    init_logging();

    let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let (addr, handle) = serve_once(read_all);
    let socket = connect(addr).await;

    socket.write(&payload, Duration::from_secs(10)).await.unwrap();
    socket.close();

    assert_eq!(handle.join().expect("Thread panicked"), expected);
}

#[batonio::test]
async fn test_write_after_peer_reset_fails() {
    init_logging();

    let (addr, handle) = serve_once(drop);
    let socket = connect(addr).await;
    handle.join().expect("Thread panicked");

    let chunk = vec![7u8; 64 * 1024];
    let mut failure = None;

    for _ in 0..200 {
        match socket.write(&chunk, Duration::from_secs(5)).await {
            Ok(()) => thread::sleep(Duration::from_millis(5)),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    match failure {
        Some(Error::WriteFailed { bytes_written, .. }) => assert!(bytes_written <= chunk.len()),
        other => panic!("expected WriteFailed, got {other:?}"),
    }
}

#[batonio::test]
async fn test_cancelled_write_resets_connection() {
    init_logging();

    // The peer never reads, so a large write stalls once buffers fill.
    let (addr, handle) = serve_once(|stream| {
        thread::sleep(Duration::from_millis(300));
        drop(stream);
    });

    let event_loop = current_loop();
    let socket = connect(addr).await;
    let source = Rc::new(CancellationSource::new());

    {
        let source = source.clone();
        event_loop.schedule_timeout(Duration::from_millis(20), move || {
            source.request_cancellation();
        });
    }

    let payload = vec![1u8; 64 * 1024 * 1024];
    let result = with_cancellation(source.token(), socket.write(&payload, Duration::ZERO)).await;

    match result {
        Err(Error::Cancelled { bytes_written }) => assert!(bytes_written < payload.len()),
        other => panic!("expected Cancelled, got {other:?}"),
    }
    assert_eq!(socket.async_socket().state(), SocketState::Closed);
    assert!(!socket.async_socket().has_pending_write());

    handle.join().expect("Thread panicked");
}

#[batonio::test]
async fn test_write_send_timeout() {
    init_logging();

    let (addr, handle) = serve_once(|stream| {
        thread::sleep(Duration::from_millis(300));
        drop(stream);
    });

    let socket = connect(addr).await;
    let payload = vec![2u8; 64 * 1024 * 1024];

    let result = socket.write(&payload, Duration::from_millis(30)).await;

    match result {
        Err(Error::WriteFailed { bytes_written, source }) => {
            assert_eq!(source.kind(), batonio::net::SocketErrorKind::TimedOut);
            assert!(bytes_written < payload.len());
        }
        other => panic!("expected a timed out write, got {other:?}"),
    }

    handle.join().expect("Thread panicked");
}
