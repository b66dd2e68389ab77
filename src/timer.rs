//! Timer queue — one-shot and periodic timers with cancellation.
//!
//! Timers are kept in a binary heap ordered by `due_ms`, giving O(log n)
//! scheduling and a plain due-time-ordered fire rule without committing to
//! a fixed tick granularity. Slots are reused via a generation counter so a
//! stale handle can never alias a timer that now occupies its old slot.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

use crate::clock::ClockMs;

/// Whether a timer's `due` was given as an absolute clock stamp or relative
/// to "now" at schedule time.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Mode {
    Absolute,
    Relative,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Status {
    Scheduled,
    Firing,
    Cancelled,
    Expired,
}

/// Opaque handle to a scheduled timer, returned by
/// [`TimerQueue::schedule`]. Carries a generation counter so a handle from a
/// cancelled-then-reused slot can never alias a different timer.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct TimerHandle {
    slot: usize,
    generation: u64,
}

pub type Result<T> = std::result::Result<T, TimerError>;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TimerError {
    /// `schedule` was called on a loop that has already been asked to stop.
    LoopStopped,
    /// The handle does not belong to this queue (or never existed).
    UnknownHandle,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::LoopStopped => f.write_str("cannot schedule on a stopped loop"),
            TimerError::UnknownHandle => f.write_str("timer handle is unknown to this queue"),
        }
    }
}

impl std::error::Error for TimerError {}

struct Slot<T> {
    due_ms: u64,
    period_ms: u64,
    mode: Mode,
    status: Status,
    generation: u64,
    user: Option<T>,
    // Insertion order, used to break ties among timers due at the same
    // instant.
    seq: u64,
}

struct HeapEntry {
    due_ms: u64,
    seq: u64,
    slot: usize,
    generation: u64,
}

impl Eq for HeapEntry {}
impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due_ms == other.due_ms && self.seq == other.seq
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest due_ms sorts
        // first, with lower seq (earlier insertion) breaking ties.
        other
            .due_ms
            .cmp(&self.due_ms)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A priority queue of timers keyed by `due_ms`, owned by exactly one
/// [`crate::loop_::EventLoop`]; a timer cannot be armed on any queue but the
/// one that scheduled it.
pub struct TimerQueue<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    heap: BinaryHeap<HeapEntry>,
    next_seq: u64,
    stopped: bool,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        TimerQueue::new()
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> TimerQueue<T> {
        TimerQueue {
            slots: Vec::new(),
            free: Vec::new(),
            heap: BinaryHeap::new(),
            next_seq: 0,
            stopped: false,
        }
    }

    /// Marks the owning loop as stopped; further `schedule` calls fail.
    pub fn stop_accepting(&mut self) {
        self.stopped = true;
    }

    /// O(log n): pushes onto the binary heap.
    pub fn schedule(
        &mut self,
        due_ms: u64,
        period_ms: u64,
        mode: Mode,
        user: T,
    ) -> Result<TimerHandle> {
        if self.stopped {
            return Err(TimerError::LoopStopped);
        }
        let seq = self.next_seq;
        self.next_seq += 1;

        let slot_idx = if let Some(idx) = self.free.pop() {
            self.slots[idx] = Slot {
                due_ms,
                period_ms,
                mode,
                status: Status::Scheduled,
                generation: self.slots[idx].generation + 1,
                user: Some(user),
                seq,
            };
            idx
        } else {
            self.slots.push(Slot {
                due_ms,
                period_ms,
                mode,
                status: Status::Scheduled,
                generation: 0,
                user: Some(user),
                seq,
            });
            self.slots.len() - 1
        };

        let generation = self.slots[slot_idx].generation;
        self.heap.push(HeapEntry {
            due_ms,
            seq,
            slot: slot_idx,
            generation,
        });

        Ok(TimerHandle {
            slot: slot_idx,
            generation,
        })
    }

    /// Idempotent: cancelling an already-fired or already-cancelled timer is
    /// a no-op. A cancel that races a firing either lands before the
    /// callback runs (handle marked `Cancelled`, never fires) or after (the
    /// fire already consumed the slot; this call observes a no-op via the
    /// generation check).
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.slots.get_mut(handle.slot) {
            Some(slot) if slot.generation == handle.generation && slot.status == Status::Scheduled => {
                slot.status = Status::Cancelled;
                slot.user = None;
                self.free.push(handle.slot);
                true
            }
            _ => false,
        }
    }

    /// Cancel + schedule, atomic with respect to this queue.
    pub fn reschedule(&mut self, handle: TimerHandle, new_due_ms: u64) -> Result<TimerHandle> {
        let slot = self
            .slots
            .get(handle.slot)
            .filter(|s| s.generation == handle.generation)
            .ok_or(TimerError::UnknownHandle)?;
        let period_ms = slot.period_ms;
        let mode = slot.mode;
        let user = self.slots[handle.slot].user.take();
        self.cancel(handle);
        let user = user.ok_or(TimerError::UnknownHandle)?;
        self.schedule(new_due_ms, period_ms, mode, user)
    }

    pub fn adjust(&mut self, handle: TimerHandle, delta_ms: i64) -> Result<TimerHandle> {
        let due = self
            .slots
            .get(handle.slot)
            .filter(|s| s.generation == handle.generation)
            .map(|s| s.due_ms)
            .ok_or(TimerError::UnknownHandle)?;
        let new_due = if delta_ms >= 0 {
            due.saturating_add(delta_ms as u64)
        } else {
            due.saturating_sub((-delta_ms) as u64)
        };
        self.reschedule(handle, new_due)
    }

    /// Milliseconds until the earliest live timer is due, relative to `now`,
    /// or `None` if the queue is empty.
    pub fn wait_ms(&self, now_ms: ClockMs) -> Option<u64> {
        self.peek_due().map(|due| due.saturating_sub(now_ms.0))
    }

    fn peek_due(&self) -> Option<u64> {
        // Skip stale heap entries (cancelled/rescheduled-away) without
        // popping them — `fire_due` performs the actual pop-and-validate.
        self.heap
            .iter()
            .filter(|e| {
                self.slots
                    .get(e.slot)
                    .is_some_and(|s| s.generation == e.generation && s.status == Status::Scheduled)
            })
            .map(|e| e.due_ms)
            .min()
    }

    /// Fires every timer due at or before `now_ms`, in due-time order with
    /// ties broken by insertion order, invoking `on_fire(user, due_ms)` for
    /// each. A periodic timer is re-armed with `due_ms += period_ms` off the
    /// *start* time of this fire (absolute mode) so drift does not
    /// accumulate, or off `now_ms` (relative mode), which can accumulate
    /// drift under processing delay.
    pub fn fire_due(&mut self, now_ms: ClockMs, mut on_fire: impl FnMut(&mut T, u64)) {
        loop {
            let Some(top) = self.heap.peek() else { break };
            if top.due_ms > now_ms.0 {
                break;
            }
            let entry = self.heap.pop().expect("peeked Some");
            let Some(slot) = self.slots.get_mut(entry.slot) else {
                continue;
            };
            if slot.generation != entry.generation || slot.status != Status::Scheduled {
                continue;
            }
            slot.status = Status::Firing;
            let due_ms = slot.due_ms;
            let period_ms = slot.period_ms;
            let mode = slot.mode;
            if let Some(user) = slot.user.as_mut() {
                on_fire(user, due_ms);
            }

            if period_ms == 0 {
                slot.status = Status::Expired;
                slot.user = None;
                self.free.push(entry.slot);
            } else {
                let next_due = match mode {
                    Mode::Absolute => due_ms + period_ms,
                    Mode::Relative => now_ms.0 + period_ms,
                };
                slot.due_ms = next_due;
                slot.status = Status::Scheduled;
                let seq = self.next_seq;
                self.next_seq += 1;
                slot.seq = seq;
                self.heap.push(HeapEntry {
                    due_ms: next_due,
                    seq,
                    slot: entry.slot,
                    generation: entry.generation,
                });
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.peek_due().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_due_order_with_ties_broken_by_insertion() {
        let mut q: TimerQueue<u32> = TimerQueue::new();
        let _a = q.schedule(100, 0, Mode::Absolute, 1).unwrap();
        let _b = q.schedule(100, 0, Mode::Absolute, 2).unwrap();
        let _c = q.schedule(50, 0, Mode::Absolute, 3).unwrap();

        let mut order = Vec::new();
        q.fire_due(ClockMs(200), |user, _due| order.push(*user));
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn periodic_absolute_timer_rearms_without_drift() {
        let mut q: TimerQueue<u32> = TimerQueue::new();
        q.schedule(10, 10, Mode::Absolute, 0).unwrap();

        let mut fires = Vec::new();
        // A late first poll (due at 10, observed at 35) must not shift
        // subsequent due times — they stay locked to the original cadence.
        q.fire_due(ClockMs(35), |_user, due| fires.push(due));
        assert_eq!(fires, vec![10]);
        q.fire_due(ClockMs(35), |_user, due| fires.push(due));
        assert_eq!(fires, vec![10, 20, 30]);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut q: TimerQueue<u32> = TimerQueue::new();
        let h = q.schedule(100, 0, Mode::Absolute, 1).unwrap();
        assert!(q.cancel(h));
        assert!(!q.cancel(h));

        let mut fires = 0;
        q.fire_due(ClockMs(1000), |_, _| fires += 1);
        assert_eq!(fires, 0);
    }

    #[test]
    fn schedule_on_stopped_queue_fails() {
        let mut q: TimerQueue<u32> = TimerQueue::new();
        q.stop_accepting();
        assert_eq!(
            q.schedule(100, 0, Mode::Absolute, 1),
            Err(TimerError::LoopStopped)
        );
    }

    #[test]
    fn reschedule_moves_due_time_atomically() {
        let mut q: TimerQueue<u32> = TimerQueue::new();
        let h = q.schedule(100, 0, Mode::Absolute, 7).unwrap();
        let h2 = q.reschedule(h, 10).unwrap();

        let mut fires = Vec::new();
        q.fire_due(ClockMs(10), |user, _| fires.push(*user));
        assert_eq!(fires, vec![7]);
        assert_ne!(h.generation, h2.generation);
    }
}
