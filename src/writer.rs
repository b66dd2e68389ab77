//! The async writer: a bounded mpsc queue plus dedicated worker thread,
//! size-capped with drop-oldest, and a command channel.
//!
//! A thin control struct (`Shared`, tracking `current_bytes` and the queue
//! itself under one mutex/condvar pair) wraps a plain `VecDeque` rather
//! than hand-rolling a lock-free ring buffer. The worker thread is spawned
//! with `std::thread::Builder` so it can be given a name for diagnostics.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Line ending used for internal notices (e.g. the "dropped N messages"
/// notice emitted ahead of the next surviving write).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum LineEnding {
    Native,
    Unix,
    Windows,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Unix => "\n",
            LineEnding::Windows => "\r\n",
            LineEnding::Native => {
                if cfg!(windows) {
                    "\r\n"
                } else {
                    "\n"
                }
            }
        }
    }
}

/// Commands OR-merged into the bitmask the next `write_cb` invocation sees
/// and clears.
pub mod command {
    pub const SUSPEND: u64 = 0b001;
    pub const RESUME: u64 = 0b010;
    pub const FLUSH: u64 = 0b100;
}

/// Return value of the user-supplied `write_cb`: whether the message was
/// consumed, or should be returned to the head of the queue for a later
/// retry. The callback owns this decision; the writer never retries on its
/// own judgment.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum WriteOutcome {
    Consumed,
    Requeue,
}

type WriteCb = dyn FnMut(&[u8], u64) -> WriteOutcome + Send;
type StopCb = dyn FnOnce() + Send;
type DestroyCb = dyn FnOnce() + Send;

/// Which teardown path the worker loop exited through: `stop()` drains the
/// queue and blocks for the worker to join, so its callback may do a
/// blocking close; `destroy()`/`destroy_blocking()` is asynchronous, so its
/// callback must not block.
enum ExitReason {
    Stopped,
    Destroyed,
}

struct Shared {
    capacity_bytes: usize,
    current_bytes: usize,
    messages: VecDeque<Vec<u8>>,
    commands: u64,
    stopped: bool,
    suspended: bool,
    destroy_requested: bool,
    orphaned: bool,
    dropped_since_last_write: u64,
}

impl Shared {
    fn fits(&self, len: usize) -> bool {
        len <= self.capacity_bytes
    }

    /// Backpressure: evict oldest messages until the new one fits, counting
    /// drops; a message larger than capacity alone is dropped immediately.
    fn enqueue(&mut self, msg: Vec<u8>) -> bool {
        if !self.fits(msg.len()) {
            self.dropped_since_last_write += 1;
            return false;
        }
        while self.current_bytes + msg.len() > self.capacity_bytes {
            match self.messages.pop_front() {
                Some(evicted) => {
                    self.current_bytes -= evicted.len();
                    self.dropped_since_last_write += 1;
                }
                None => break,
            }
        }
        self.current_bytes += msg.len();
        self.messages.push_back(msg);
        true
    }
}

/// Handle to a running (or not-yet-started) async writer.
pub struct AsyncWriter {
    shared: Arc<(Mutex<Shared>, Condvar)>,
    worker: Mutex<Option<JoinHandle<()>>>,
    line_ending: LineEnding,
}

impl fmt::Debug for AsyncWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncWriter")
            .field("line_ending", &self.line_ending)
            .finish()
    }
}

impl AsyncWriter {
    pub fn create(capacity_bytes: usize, line_ending: LineEnding) -> Arc<AsyncWriter> {
        Arc::new(AsyncWriter {
            shared: Arc::new((
                Mutex::new(Shared {
                    capacity_bytes,
                    current_bytes: 0,
                    messages: VecDeque::new(),
                    commands: 0,
                    stopped: false,
                    suspended: false,
                    destroy_requested: false,
                    orphaned: false,
                    dropped_since_last_write: 0,
                }),
                Condvar::new(),
            )),
            worker: Mutex::new(None),
            line_ending,
        })
    }

    /// Starts the worker thread. A writer created but never started simply
    /// accumulates messages up to capacity.
    pub fn start(
        self: &Arc<Self>,
        mut write_cb: Box<WriteCb>,
        stop_cb: Option<Box<StopCb>>,
        destroy_cb: Option<Box<DestroyCb>>,
    ) {
        let shared = Arc::clone(&self.shared);
        let line_ending = self.line_ending;
        let handle = thread::Builder::new()
            .name("async-writer".into())
            .spawn(move || {
                match Self::worker_loop(shared, &mut *write_cb, line_ending) {
                    ExitReason::Stopped => {
                        if let Some(stop_cb) = stop_cb {
                            stop_cb();
                        }
                    }
                    ExitReason::Destroyed => {
                        if let Some(destroy_cb) = destroy_cb {
                            destroy_cb();
                        }
                    }
                }
            })
            .expect("failed to spawn async writer worker thread");
        *self.worker.lock().unwrap() = Some(handle);
    }

    fn worker_loop(
        shared: Arc<(Mutex<Shared>, Condvar)>,
        write_cb: &mut WriteCb,
        line_ending: LineEnding,
    ) -> ExitReason {
        let (mutex, condvar) = &*shared;
        loop {
            let mut guard = mutex.lock().unwrap();
            loop {
                if guard.destroy_requested && guard.messages.is_empty() {
                    return ExitReason::Destroyed;
                }
                if guard.stopped && guard.messages.is_empty() && guard.commands == 0 {
                    return ExitReason::Stopped;
                }
                if guard.suspended {
                    // If suspended, sleep briefly and retry.
                    let (g, _timeout) = condvar
                        .wait_timeout(guard, Duration::from_millis(20))
                        .unwrap();
                    guard = g;
                    if guard.commands & command::RESUME != 0 {
                        guard.suspended = false;
                        guard.commands &= !command::RESUME;
                    }
                    continue;
                }
                if !guard.messages.is_empty() || guard.commands != 0 {
                    break;
                }
                guard = condvar.wait(guard).unwrap();
            }

            if guard.commands & command::SUSPEND != 0 {
                guard.suspended = true;
                guard.commands &= !command::SUSPEND;
                continue;
            }

            let commands = guard.commands;
            guard.commands = 0;
            let dropped = std::mem::take(&mut guard.dropped_since_last_write);

            let mut msg = guard.messages.pop_front();
            if let Some(ref m) = msg {
                guard.current_bytes -= m.len();
            }
            drop(guard);

            if dropped > 0 {
                let notice = format!("dropped {dropped} messages{}", line_ending.as_str());
                write_cb(notice.as_bytes(), 0);
            }

            if let Some(m) = msg.take() {
                match write_cb(&m, commands) {
                    WriteOutcome::Consumed => {}
                    WriteOutcome::Requeue => {
                        let mut guard = mutex.lock().unwrap();
                        guard.current_bytes += m.len();
                        guard.messages.push_front(m);
                    }
                }
            } else if commands != 0 {
                // A forced command with no pending message still reaches
                // the callback.
                write_cb(&[], commands);
            }
        }
    }

    /// Non-blocking; returns whether the message was accepted into the
    /// queue. Acceptance does not guarantee the message is ever written,
    /// since a later backpressure eviction can still drop it.
    pub fn enqueue(&self, msg: Vec<u8>) -> bool {
        let (mutex, condvar) = &*self.shared;
        let mut guard = mutex.lock().unwrap();
        if guard.stopped || guard.destroy_requested {
            return false;
        }
        let accepted = guard.enqueue(msg);
        condvar.notify_one();
        accepted
    }

    /// OR-merges `flag` into the command bitmask.
    pub fn set_command(&self, flag: u64) {
        let (mutex, condvar) = &*self.shared;
        let mut guard = mutex.lock().unwrap();
        guard.commands |= flag;
        condvar.notify_one();
    }

    /// Waits until the worker has processed this specific command (cleared
    /// it from the bitmask).
    pub fn set_command_blocking(&self, flag: u64) {
        let (mutex, condvar) = &*self.shared;
        let mut guard = mutex.lock().unwrap();
        guard.commands |= flag;
        condvar.notify_one();
        while guard.commands & flag != 0 {
            guard = condvar.wait(guard).unwrap();
        }
    }

    /// Blocks until the worker drains its current message and exits.
    pub fn stop(&self) {
        let (mutex, condvar) = &*self.shared;
        {
            let mut guard = mutex.lock().unwrap();
            guard.stopped = true;
            condvar.notify_one();
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Non-blocking teardown; `flush` requests the worker drain pending
    /// messages before exiting rather than discarding them.
    pub fn destroy(&self, flush: bool) {
        let (mutex, condvar) = &*self.shared;
        let mut guard = mutex.lock().unwrap();
        guard.destroy_requested = true;
        if !flush {
            guard.messages.clear();
            guard.current_bytes = 0;
        }
        condvar.notify_one();
    }

    /// Bounded variant. On timeout the writer is marked orphaned and the
    /// call returns; the worker self-frees on its next iteration.
    pub fn destroy_blocking(&self, flush: bool, timeout_ms: u64) {
        self.destroy(flush);
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let (mutex, _) = &*self.shared;
            let deadline = Duration::from_millis(timeout_ms);
            let start = std::time::Instant::now();
            loop {
                if handle.is_finished() {
                    let _ = handle.join();
                    return;
                }
                if start.elapsed() >= deadline {
                    mutex.lock().unwrap().orphaned = true;
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    pub fn is_orphaned(&self) -> bool {
        self.shared.0.lock().unwrap().orphaned
    }

    pub fn current_bytes(&self) -> usize {
        self.shared.0.lock().unwrap().current_bytes
    }
}
