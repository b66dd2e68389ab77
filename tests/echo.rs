//! 50 parallel TCP connections through a pool of `min(cpu, 4)` loops. The
//! server echoes, then sends "GoodBye" and
//! disconnects; the client sends "HelloWorld", waits for the echo and the
//! "GoodBye", then disconnects itself. All 50 pairs must finish with no
//! ERROR events.
//!
//! Connections are partitioned across the pool's loops *before* the pool is
//! built, since `PoolBuilder::build`'s `run_loop` closure owns its
//! `EventLoop` by value and registration has to happen on the thread that
//! owns the loop (see the architectural-boundary note in `DESIGN.md`).

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nexio::event::{Event, EventKind};
use nexio::loop_::{EventLoop, LoopHandle};
use nexio::object::{IoObject, ObjectKind};
use nexio::pool::PoolBuilder;
use nexio::token::Token;

use common::{registerable_of, ConnectedPair};

const NUM_PAIRS: usize = 50;

enum Role {
    Server,
    Client,
}

/// Registers one connection's callback on `lp`, returning nothing: the
/// callback reports completion/error through the shared counters.
fn register(
    lp: &mut EventLoop,
    role: Role,
    pair: nexio::adapters::net::TcpConnectionLeaf,
    completed: Arc<AtomicUsize>,
    errored: Arc<AtomicUsize>,
) {
    let registerable = registerable_of(&pair);
    let mut object = IoObject::new(ObjectKind::Stream, vec![Box::new(pair)]);

    // These pairs are already connected by the time `from_accepted` builds
    // them (see `TcpConnectionLeaf`'s doc comment), so no `Connected` event
    // is ever synthesized for them — the client writes its opening line
    // right away instead of waiting for one.
    if matches!(role, Role::Client) {
        let _ = object.write(b"HelloWorld");
    }

    let token_cell: Arc<Mutex<Option<Token>>> = Arc::new(Mutex::new(None));
    let token_cell_cb = token_cell.clone();
    let handle: LoopHandle = lp.handle();

    let mut received: Vec<u8> = Vec::new();
    let mut finished = false;

    let callback = Box::new(move |event: &Event, obj: &mut IoObject| {
        if finished {
            return;
        }
        if let EventKind::Error = event.kind() {
            errored.fetch_add(1, Ordering::SeqCst);
            finished = true;
            return;
        }

        loop {
            let mut buf = [0u8; 256];
            match obj.read(&mut buf) {
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(nexio::IoErrorKind::WouldBlock) => break,
                Err(_) => {
                    finished = true;
                    break;
                }
            }
        }
        if finished {
            return;
        }

        match role {
            Role::Server => {
                if received.windows(10).any(|w| w == b"HelloWorld") {
                    let _ = obj.write(b"HelloWorld");
                    let _ = obj.write(b"GoodBye");
                    obj.disconnect();
                    finished = true;
                    completed.fetch_add(1, Ordering::SeqCst);
                }
            }
            Role::Client => {
                if received.windows(7).any(|w| w == b"GoodBye") {
                    obj.disconnect();
                    finished = true;
                    completed.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        if finished {
            if let Some(tok) = *token_cell_cb.lock().unwrap() {
                handle.destroy_object(tok);
            }
        }
    });

    let token = lp
        .add(object, &registerable, callback)
        .expect("registration should succeed in a test sandbox");
    *token_cell.lock().unwrap() = Some(token);
}

#[test]
fn echo_fifty_parallel_connections_all_complete_cleanly() {
    let pool_size = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(4);

    let completed = Arc::new(AtomicUsize::new(0));
    let errored = Arc::new(AtomicUsize::new(0));

    let mut buckets: Vec<Vec<(Role, nexio::adapters::net::TcpConnectionLeaf)>> =
        (0..pool_size).map(|_| Vec::new()).collect();
    for i in 0..NUM_PAIRS {
        let ConnectedPair { client, server } = common::connected_pair();
        let idx = i % pool_size;
        buckets[idx].push((Role::Server, server));
        buckets[idx].push((Role::Client, client));
    }
    let buckets: Arc<Mutex<Vec<Option<Vec<(Role, nexio::adapters::net::TcpConnectionLeaf)>>>>> =
        Arc::new(Mutex::new(buckets.into_iter().map(Some).collect()));

    let completed_rl = completed.clone();
    let errored_rl = errored.clone();
    let buckets_rl = buckets.clone();

    let mut pool = PoolBuilder::new()
        .size(pool_size)
        .build(move |idx, mut lp| {
            let bucket = buckets_rl.lock().unwrap()[idx].take().unwrap_or_default();
            for (role, leaf) in bucket {
                register(&mut lp, role, leaf, completed_rl.clone(), errored_rl.clone());
            }
            let _ = lp.run(None);
        })
        .expect("pool should spawn in a test sandbox");

    let deadline = Instant::now() + Duration::from_secs(10);
    while completed.load(Ordering::SeqCst) < NUM_PAIRS * 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    pool.done();

    assert_eq!(errored.load(Ordering::SeqCst), 0, "no connection should see an ERROR event");
    assert_eq!(
        completed.load(Ordering::SeqCst),
        NUM_PAIRS * 2,
        "every server and client side should disconnect cleanly"
    );
}
