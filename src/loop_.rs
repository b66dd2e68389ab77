//! The event loop: readiness demultiplexer, timer queue, soft-event queue,
//! pool fan-out, statistics.
//!
//! A single loop step registers a notify channel and a timer source with
//! the selector under reserved tokens, then polls, drains due timers, and
//! dispatches remaining readiness events by token into each registered
//! object's layer stack. An explicit soft-event FIFO lets a layer inject a
//! synthetic event for the next iteration instead of needing a per-layer
//! flag checked on every pass.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::event::{Event, EventKind, Events};
use crate::interest::Interest;
use crate::layer::Direction;
use crate::object::{IoObject, SoftEvent};
use crate::sys::Selector;
use crate::timer;
use crate::token::Token;

pub type UserCallback = Box<dyn FnMut(&Event, &mut IoObject) + Send>;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RunResult {
    Done,
    Return,
    Timeout,
    Misuse,
}

/// Registerable handle: a leaf layer exposes its raw OS fd plus the
/// directions it wants watched.
pub trait Registerable {
    fn raw_fd(&self) -> crate::sys::RawFd;
    fn interest(&self) -> Interest;
}

enum ControlMsg {
    Destroy(Token),
    Wake,
}

/// Cheaply cloneable, `Send` handle used to talk to a running loop from any
/// thread; calls signal the loop's waker so a blocked `select()` wakes up
/// promptly instead of waiting out its poll slice.
#[derive(Clone)]
pub struct LoopHandle {
    tx: mpsc::Sender<ControlMsg>,
    waker: Arc<crate::sys::Waker>,
    stop_done: Arc<AtomicBool>,
    stop_return: Arc<AtomicBool>,
}

impl LoopHandle {
    /// Enqueues a destroy request and returns immediately; the loop
    /// processes it at the next iteration boundary, from any thread.
    pub fn destroy_object(&self, token: Token) {
        let _ = self.tx.send(ControlMsg::Destroy(token));
        let _ = self.waker.wake();
    }

    /// Cooperative stop: the current iteration completes, then `run()`
    /// returns `Done`.
    pub fn done(&self) {
        self.stop_done.store(true, Ordering::SeqCst);
        let _ = self.waker.wake();
    }

    /// Requests that the next `step()` return `Return` instead of looping.
    pub fn request_return(&self) {
        self.stop_return.store(true, Ordering::SeqCst);
        let _ = self.waker.wake();
    }
}

#[derive(Default, Debug)]
pub struct Stats {
    pub wake_count: u64,
    pub process_time_ms: u64,
    pub osevent_count: u64,
    pub softevent_count: u64,
    pub timer_count: u64,
}

struct Registration {
    object: IoObject,
    callback: UserCallback,
}

/// What a timer fire targets: either a free-standing user callback with no
/// object, or one posted against a specific object's OTHER event.
enum TimerTarget {
    ObjectOther(Token),
    Free(Box<dyn FnMut() + Send>),
}

const SOFT_EVENT_BUDGET_PER_ITERATION: usize = 4096;

/// Single threaded I/O event loop.
pub struct EventLoop {
    selector: Selector,
    events: Events,
    registry: HashMap<Token, Registration>,
    next_token: usize,
    timers: timer::TimerQueue<TimerTarget>,
    softevents: VecDeque<(Token, Direction, Event)>,
    pending_destroys: Vec<Token>,
    clock: Clock,
    rx: mpsc::Receiver<ControlMsg>,
    handle: LoopHandle,
    misuse: bool,
    stats: Stats,
    stat_counters: StatCounters,
}

#[derive(Default)]
struct StatCounters {
    wake_count: AtomicU64,
    osevent_count: AtomicU64,
    softevent_count: AtomicU64,
    timer_count: AtomicU64,
}

impl EventLoop {
    pub fn new() -> io::Result<EventLoop> {
        let selector = Selector::new(1024)?;
        let waker = Arc::new(crate::sys::Waker::new(&selector, Token::WAKER)?);
        let (tx, rx) = mpsc::channel();
        let handle = LoopHandle {
            tx,
            waker,
            stop_done: Arc::new(AtomicBool::new(false)),
            stop_return: Arc::new(AtomicBool::new(false)),
        };
        Ok(EventLoop {
            selector,
            events: Events::with_capacity(1024),
            registry: HashMap::new(),
            next_token: 0,
            timers: timer::TimerQueue::new(),
            softevents: VecDeque::new(),
            pending_destroys: Vec::new(),
            clock: Clock::new(),
            rx,
            handle,
            misuse: false,
            stats: Stats::default(),
            stat_counters: StatCounters::default(),
        })
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Registers an object with the loop under a freshly issued token.
    /// Fails synchronously if the leaf's fd cannot register with the mux.
    pub fn add(
        &mut self,
        mut object: IoObject,
        registerable: &dyn Registerable,
        callback: UserCallback,
    ) -> io::Result<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.selector
            .register(registerable.raw_fd(), token, registerable.interest())?;
        object.set_token(token);
        self.registry.insert(token, Registration { object, callback });
        Ok(token)
    }

    pub fn remove(&mut self, token: Token, registerable: &dyn Registerable) -> Option<IoObject> {
        let _ = self.selector.deregister(registerable.raw_fd());
        self.registry.remove(&token).map(|r| r.object)
    }

    pub fn object_mut(&mut self, token: Token) -> Option<&mut IoObject> {
        self.registry.get_mut(&token).map(|r| &mut r.object)
    }

    /// Arms a free-standing timer callback. O(log n).
    pub fn schedule_timer(
        &mut self,
        due_ms: u64,
        period_ms: u64,
        mode: timer::Mode,
        cb: Box<dyn FnMut() + Send>,
    ) -> timer::Result<timer::TimerHandle> {
        self.timers.schedule(due_ms, period_ms, mode, TimerTarget::Free(cb))
    }

    /// Arms a timer posted against a specific object's OTHER event: fires
    /// as a regular `Event::new(EventKind::Other, token)` delivered through
    /// the normal `deliver` path, rather than invoking a free-standing
    /// callback — the counterpart to [`EventLoop::schedule_timer`] for
    /// callers that want the timer to drive a registered object (e.g. a
    /// bandwidth-shaped write retry) instead of running detached code.
    pub fn schedule_object_timer(
        &mut self,
        token: Token,
        due_ms: u64,
        period_ms: u64,
        mode: timer::Mode,
    ) -> timer::Result<timer::TimerHandle> {
        self.timers.schedule(due_ms, period_ms, mode, TimerTarget::ObjectOther(token))
    }

    pub fn cancel_timer(&mut self, handle: timer::TimerHandle) -> bool {
        self.timers.cancel(handle)
    }

    pub fn reschedule_timer(
        &mut self,
        handle: timer::TimerHandle,
        new_due_ms: u64,
    ) -> timer::Result<timer::TimerHandle> {
        self.timers.reschedule(handle, new_due_ms)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms().0
    }

    /// A layer calls this (indirectly, via the loop that owns its object)
    /// to synthesize an event for the next iteration.
    pub fn post_soft_event(&mut self, token: Token, direction: Direction, event: Event) {
        self.softevents.push_back((token, direction, event));
    }

    pub fn get_statistic_snapshot(&self) -> Stats {
        // No atomicity across counters is promised: each counter is read
        // independently with a relaxed load.
        Stats {
            wake_count: self.stat_counters.wake_count.load(Ordering::Relaxed),
            process_time_ms: self.stats.process_time_ms,
            osevent_count: self.stat_counters.osevent_count.load(Ordering::Relaxed),
            softevent_count: self.stat_counters.softevent_count.load(Ordering::Relaxed),
            timer_count: self.stat_counters.timer_count.load(Ordering::Relaxed),
        }
    }

    /// Runs the loop until a caller signals `done`/`request_return`, or the
    /// OS mux fails. `timeout_ms` only bounds each individual poll slice,
    /// not the overall call: a plain `Timeout` keeps the loop running.
    pub fn run(&mut self, timeout_ms: Option<u64>) -> RunResult {
        if self.misuse {
            return RunResult::Misuse;
        }
        let deadline = timeout_ms.map(|ms| self.clock.now_ms().0 + ms);
        loop {
            match self.step(deadline) {
                RunResult::Timeout => continue,
                other => return other,
            }
        }
    }

    fn drain_control_messages(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                ControlMsg::Destroy(token) => self.pending_destroys.push(token),
                ControlMsg::Wake => {}
            }
        }
        self.handle.waker.drain();
    }

    /// One iteration: drain pending destroys and soft events, check for a
    /// stop request, poll the OS mux, then fire due timers and readiness
    /// events.
    fn step(&mut self, deadline_ms: Option<u64>) -> RunResult {
        let start = std::time::Instant::now();

        // 1. process all pending destroys (deferred from a callback, or
        // requested cross-thread).
        for token in std::mem::take(&mut self.pending_destroys) {
            if let Some(mut reg) = self.registry.remove(&token) {
                reg.object.destroy();
            }
        }

        // 2. deliver all soft events from the FIFO, bottom-up per target,
        // bounded to avoid starving OS readiness forever.
        let mut delivered = 0;
        while let Some((token, _direction, event)) = self.softevents.pop_front() {
            self.deliver(token, event);
            self.stat_counters.softevent_count.fetch_add(1, Ordering::Relaxed);
            delivered += 1;
            if delivered >= SOFT_EVENT_BUDGET_PER_ITERATION {
                break;
            }
        }

        if self.handle.stop_done.load(Ordering::SeqCst) {
            return RunResult::Done;
        }
        if self.handle.stop_return.swap(false, Ordering::SeqCst) {
            return RunResult::Return;
        }

        // 3. compute wait = min(next_timer - now, caller deadline).
        let now = self.clock.now_ms();
        let timer_wait = self.timers.wait_ms(now);
        let deadline_wait = deadline_ms.map(|d| d.saturating_sub(now.0));
        let wait = match (timer_wait, deadline_wait) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        // Never block indefinitely if there is truly nothing scheduled and
        // no deadline: poll with a bounded slice so cross-thread control
        // messages (destroy/done/return) are still observed promptly.
        let wait = Some(Duration::from_millis(wait.unwrap_or(1000)));

        // 4. poll OS mux.
        self.events.clear();
        match self.selector.select(&mut self.events, wait) {
            Ok(_) => {}
            Err(err) => {
                self.misuse = true;
                log::warn!("os mux failed unrecoverably: {err}");
                return RunResult::Misuse;
            }
        }

        self.drain_control_messages();

        // 5. fire expired timers in due-time order.
        let mut fired_tokens = Vec::new();
        self.timers.fire_due(self.clock.now_ms(), |target, _due| match target {
            TimerTarget::ObjectOther(token) => fired_tokens.push(*token),
            TimerTarget::Free(cb) => cb(),
        });
        for token in fired_tokens {
            self.stat_counters.timer_count.fetch_add(1, Ordering::Relaxed);
            self.deliver(token, Event::new(EventKind::Other, token));
        }

        // 6. for each OS readiness, inject the corresponding event.
        let mut saw_waker = false;
        let pending: Vec<Event> = self.events.iter().cloned().collect();
        for event in pending {
            if event.token() == Token::WAKER {
                saw_waker = true;
                continue;
            }
            if event.token() == Token::NOTIFY || event.token() == Token::TIMER {
                continue;
            }
            self.stat_counters.osevent_count.fetch_add(1, Ordering::Relaxed);
            self.deliver(event.token(), event);
        }
        if saw_waker {
            self.handle.waker.drain();
        }

        self.stat_counters.wake_count.fetch_add(1, Ordering::Relaxed);
        self.stats.process_time_ms += start.elapsed().as_millis() as u64;

        if self.handle.stop_done.load(Ordering::SeqCst) {
            return RunResult::Done;
        }
        if self.handle.stop_return.swap(false, Ordering::SeqCst) {
            return RunResult::Return;
        }
        RunResult::Timeout
    }

    fn deliver(&mut self, token: Token, event: Event) {
        let Some(reg) = self.registry.get_mut(&token) else {
            return;
        };
        let (final_event, injected) = reg.object.propagate(event);
        for (direction, soft) in injected {
            self.softevents.push_back((token, direction, soft));
        }
        if let Some(final_event) = final_event {
            let Some(reg) = self.registry.get_mut(&token) else {
                return;
            };
            let terminal = final_event.is_terminal();
            (reg.callback)(&final_event, &mut reg.object);
            if terminal {
                self.pending_destroys.push(token);
            }
        }
    }

    /// Disconnects every registered object, then gives them up to
    /// `grace_ms` to settle on their own. Anything still unsettled after the
    /// grace window gets a second chance, up to `hard_ms` total, before
    /// being force-destroyed; `hard_ms` is the absolute cap a caller can
    /// rely on for how long shutdown takes.
    pub fn done_with_disconnect(&mut self, grace_ms: u64, hard_ms: u64) -> RunResult {
        for reg in self.registry.values_mut() {
            reg.object.disconnect();
        }
        let all_settled = |registry: &HashMap<Token, Registration>| {
            registry.values().all(|r| {
                matches!(
                    r.object.state(),
                    crate::layer::LayerState::Disconnected | crate::layer::LayerState::Error
                )
            })
        };

        let start = self.clock.now_ms().0;
        let grace_deadline = start + grace_ms;
        while self.clock.now_ms().0 < grace_deadline {
            if all_settled(&self.registry) {
                break;
            }
            if matches!(self.step(Some(grace_deadline)), RunResult::Misuse) {
                return RunResult::Misuse;
            }
        }

        // Objects still unsettled after the grace window get the rest of
        // `hard_ms` (measured from the original call, not from the end of
        // the grace window) to settle before being forced closed.
        let hard_deadline = start + hard_ms;
        while self.clock.now_ms().0 < hard_deadline {
            if all_settled(&self.registry) {
                break;
            }
            if matches!(self.step(Some(hard_deadline)), RunResult::Misuse) {
                return RunResult::Misuse;
            }
        }

        // Anything still unsettled after the hard deadline is forced closed.
        for token in self.registry.keys().copied().collect::<Vec<_>>() {
            if let Some(reg) = self.registry.get(&token) {
                if !matches!(
                    reg.object.state(),
                    crate::layer::LayerState::Disconnected | crate::layer::LayerState::Error
                ) {
                    self.pending_destroys.push(token);
                }
            }
        }
        self.handle.done();
        RunResult::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_loop_has_zero_statistics() {
        let lp = EventLoop::new().expect("loop creation should succeed in a test sandbox");
        let stats = lp.get_statistic_snapshot();
        assert_eq!(stats.wake_count, 0);
        assert_eq!(stats.osevent_count, 0);
    }

    #[test]
    fn done_from_handle_stops_run() {
        let mut lp = EventLoop::new().unwrap();
        let handle = lp.handle();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            handle.done();
        });
        assert_eq!(lp.run(Some(5_000)), RunResult::Done);
    }
}
