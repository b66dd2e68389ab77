//! A pool of event loops, each on its own thread, with sticky
//! least-loaded placement.
//!
//! Each member loop runs on its own worker thread; this module adds the
//! placement policy and pool-wide shutdown on top of that — tracking which
//! loop holds the fewest objects, and joining every member thread once all
//! of them have been told to stop.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::loop_::{EventLoop, LoopHandle};
use crate::token::Token;

/// Which loop in the pool an object was placed on. Kept by the caller so a
/// later `remove` or `destroy_object` is routed back to the same loop: an
/// object placed on loop N stays on loop N for its lifetime.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Placement(pub usize);

struct Member {
    handle: LoopHandle,
    load: Arc<AtomicUsize>,
    join: Option<JoinHandle<()>>,
}

/// N event loops, each run on its own OS thread, with new objects placed on
/// whichever loop currently holds the fewest objects.
pub struct EventLoopPool {
    members: Vec<Member>,
}

pub struct PoolBuilder {
    size: usize,
}

impl PoolBuilder {
    pub fn new() -> PoolBuilder {
        PoolBuilder {
            size: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        }
    }

    pub fn size(mut self, size: usize) -> PoolBuilder {
        self.size = size.max(1);
        self
    }

    /// Spawns `size` loops, each driven by `run_loop` on its own thread
    /// until that loop's `done()` fires.
    pub fn build<F>(self, run_loop: F) -> io::Result<EventLoopPool>
    where
        F: FnMut(usize, EventLoop) + Send + Clone + 'static,
    {
        let mut members = Vec::with_capacity(self.size);
        for idx in 0..self.size {
            let lp = EventLoop::new()?;
            let handle = lp.handle();
            let load = Arc::new(AtomicUsize::new(0));
            let mut run_loop = run_loop.clone();
            let join = thread::Builder::new()
                .name(format!("nexio-pool-{idx}"))
                .spawn(move || run_loop(idx, lp))
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            members.push(Member {
                handle,
                load,
                join: Some(join),
            });
        }
        Ok(EventLoopPool { members })
    }
}

impl Default for PoolBuilder {
    fn default() -> PoolBuilder {
        PoolBuilder::new()
    }
}

impl EventLoopPool {
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Picks the least-loaded member; ties broken by lowest index so
    /// placement is deterministic for a freshly built pool.
    pub fn least_loaded(&self) -> Placement {
        let mut best = 0;
        let mut best_load = usize::MAX;
        for (idx, member) in self.members.iter().enumerate() {
            let load = member.load.load(Ordering::Relaxed);
            if load < best_load {
                best_load = load;
                best = idx;
            }
        }
        Placement(best)
    }

    /// Tracks that a placement decision was acted on; callers increment
    /// after a successful `add` on the target loop and decrement on
    /// `remove`, since the pool itself never touches loop-owned registries
    /// directly (it only hands out handles and tracks counts).
    pub fn record_added(&self, placement: Placement) {
        if let Some(member) = self.members.get(placement.0) {
            member.load.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_removed(&self, placement: Placement) {
        if let Some(member) = self.members.get(placement.0) {
            member.load.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn handle(&self, placement: Placement) -> Option<LoopHandle> {
        self.members.get(placement.0).map(|m| m.handle.clone())
    }

    pub fn destroy_object(&self, placement: Placement, token: Token) {
        if let Some(member) = self.members.get(placement.0) {
            member.handle.destroy_object(token);
        }
    }

    /// Stops every member loop and joins its thread.
    pub fn done(&mut self) {
        for member in &self.members {
            member.handle.done();
        }
        for member in &mut self.members {
            if let Some(join) = member.join.take() {
                let _ = join.join();
            }
        }
    }
}
