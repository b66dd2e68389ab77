//! Async-writer backpressure. A writer sized to hold six 200-byte messages
//! is fed ten before its worker starts; the
//! four oldest are evicted (drop-oldest backpressure), and a single
//! "dropped 4 messages" notice precedes the earliest surviving write.
//!
//! This only exercises the public `AsyncWriter` API — no event loop is
//! involved, matching how `writer.rs`'s own unit tests drive it directly.

use std::sync::mpsc;
use std::time::Duration;

use nexio::writer::{AsyncWriter, LineEnding, WriteOutcome};

const MESSAGE_SIZE: usize = 200;
const CAPACITY: usize = 1_200; // exactly six messages worth
const MESSAGE_COUNT: usize = 10;

fn message(i: usize) -> Vec<u8> {
    let mut buf = format!("msg-{i}").into_bytes();
    buf.resize(MESSAGE_SIZE, 0);
    buf
}

#[test]
fn drop_oldest_backpressure_keeps_the_newest_messages() {
    let writer = AsyncWriter::create(CAPACITY, LineEnding::Native);

    for i in 0..MESSAGE_COUNT {
        writer.enqueue(message(i));
    }

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    writer.start(
        Box::new(move |buf, _commands| {
            let _ = tx.send(buf.to_vec());
            std::thread::sleep(Duration::from_millis(50));
            WriteOutcome::Consumed
        }),
        None,
        None,
    );

    let mut received = Vec::new();
    for _ in 0..7 {
        received.push(
            rx.recv_timeout(Duration::from_secs(2))
                .expect("worker should keep delivering within the timeout"),
        );
    }
    assert!(
        rx.recv_timeout(Duration::from_millis(100)).is_err(),
        "exactly seven writes (one notice + six messages) should be delivered"
    );

    let notice = String::from_utf8(received[0].clone()).unwrap();
    assert_eq!(notice, format!("dropped 4 messages{}", LineEnding::Native.as_str()));

    for (offset, payload) in received[1..].iter().enumerate() {
        let expected = message(offset + 4); // messages 0..=3 were evicted
        assert_eq!(payload, &expected, "surviving messages should be the six newest, in order");
    }
}
