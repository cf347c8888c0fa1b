mod common;

use batonio::time::sleep;
use batonio::{EventLoop, Socket, join};

use common::{current_loop, init_logging, serve_once};
use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::Rc;
use std::time::{Duration, Instant};

#[test]
fn test_join_single_future() {
    let event_loop = EventLoop::new().unwrap();

    let result = event_loop.block_on(async { join!(async { 42 }) });

    assert_eq!(result, 42);
}

#[test]
fn test_join_mixed_types_with_trailing_comma() {
    let event_loop = EventLoop::new().unwrap();

    let result = event_loop.block_on(async {
        join!(async { "hello" }, async { Some(42) }, async { vec![1, 2] },)
    });

    assert_eq!(result, ("hello", Some(42), vec![1, 2]));
}

#[test]
fn test_join_runs_timers_concurrently() {
    let event_loop = EventLoop::new().unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));
    let start = Instant::now();

    let o1 = order.clone();
    let o2 = order.clone();

    event_loop.block_on(async move {
        join!(
            async move {
                sleep(Duration::from_millis(40)).await;
                o1.borrow_mut().push("slow");
            },
            async move {
                sleep(Duration::from_millis(10)).await;
                o2.borrow_mut().push("fast");
            }
        );
    });

    assert_eq!(*order.borrow(), vec!["fast", "slow"]);
    assert!(start.elapsed() < Duration::from_millis(80));
}

#[batonio::test]
async fn test_join_read_and_write_on_one_socket() {
    init_logging();

    // Echoes one 5-byte message.
    let (addr, handle) = serve_once(|mut stream| {
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).expect("Failed to read from stream");
        stream.write_all(&buf).expect("Failed to write to stream");
    });

    let socket = Socket::connect(&current_loop(), addr, Duration::from_secs(5))
        .await
        .expect("connect failed");

    let mut buf = [0u8; 5];
    let (read, write) = join!(
        socket.read(&mut buf, Duration::from_secs(5)),
        socket.write(b"hello", Duration::from_secs(5))
    );

    assert_eq!(read.unwrap(), 5);
    write.unwrap();
    assert_eq!(&buf, b"hello");

    handle.join().expect("Thread panicked");
}
