//! Bandwidth-shaping mid-stack layer: caps throughput to a configured rate
//! using a rolling sample window.
//!
//! A ring buffer of `(clock_ms, bytes)` samples is pruned to the last
//! `window_ms` on every write, and the limiter compares the sum against
//! `limit_bytes_per_window` rather than an instantaneous derivative, which
//! is steadier under bursty callers (see `DESIGN.md` for why a rolling
//! window was chosen over an instantaneous rate).
//!
//! Composes the same way [`crate::adapters::hid::HidReportLeaf`] does: by
//! owning its inner layer directly rather than sitting beside it in
//! [`crate::object::IoObject`]'s layer vector.

use std::collections::VecDeque;

use crate::clock::ClockMs;
use crate::event::Event;
use crate::layer::{Capability, IoOutcome, Layer, LayerAction, LayerState};

/// A single write's contribution to the rolling window.
struct Sample {
    at_ms: u64,
    bytes: usize,
}

/// Caps outbound bytes per `window_ms` using a rolling window of recent
/// writes. A layer has no direct access to the owning loop's timer queue —
/// it only ever sees its own read/write/event surface — so a caller that
/// gets `WouldBlock` from [`BandwidthShaperLeaf::write`] should consult
/// [`BandwidthShaperLeaf::retry_after_ms`] and arm a timer itself (e.g. via
/// `EventLoop::schedule_timer`) to retry the write.
pub struct BandwidthShaperLeaf {
    inner: Box<dyn Layer>,
    limit_bytes_per_window: usize,
    window_ms: u64,
    samples: VecDeque<Sample>,
    window_bytes: usize,
    clock: crate::clock::Clock,
}

impl BandwidthShaperLeaf {
    pub fn wrap(inner: Box<dyn Layer>, limit_bytes_per_window: usize, window_ms: u64) -> BandwidthShaperLeaf {
        BandwidthShaperLeaf {
            inner,
            limit_bytes_per_window,
            window_ms,
            samples: VecDeque::new(),
            window_bytes: 0,
            clock: crate::clock::Clock::new(),
        }
    }

    fn prune(&mut self, now: ClockMs) {
        while let Some(front) = self.samples.front() {
            if now.elapsed_since(ClockMs(front.at_ms)) > self.window_ms {
                self.window_bytes -= self.samples.pop_front().unwrap().bytes;
            } else {
                break;
            }
        }
    }

    /// Current rolling-window usage, for callers/tests that want to assert
    /// on it directly rather than inferring it from write outcomes.
    pub fn current_window_bytes(&self) -> usize {
        self.window_bytes
    }

    /// Milliseconds until the oldest sample ages out of the window enough
    /// to admit at least one more byte; `0` if under budget right now.
    pub fn retry_after_ms(&self) -> u64 {
        if self.window_bytes < self.limit_bytes_per_window {
            return 0;
        }
        let now = self.clock.now_ms();
        self.samples
            .front()
            .map(|s| self.window_ms.saturating_sub(now.elapsed_since(ClockMs(s.at_ms))))
            .unwrap_or(0)
    }
}

impl Layer for BandwidthShaperLeaf {
    fn name(&self) -> &str {
        "bandwidth-shaper"
    }

    fn capabilities(&self) -> Capability {
        self.inner.capabilities()
    }

    fn read(&mut self, buf: &mut [u8]) -> IoOutcome<usize> {
        self.inner.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> IoOutcome<usize> {
        let now = self.clock.now_ms();
        self.prune(now);
        if self.window_bytes >= self.limit_bytes_per_window {
            return IoOutcome::WouldBlock;
        }
        let allowed = (self.limit_bytes_per_window - self.window_bytes).min(buf.len());
        if allowed == 0 {
            return IoOutcome::WouldBlock;
        }
        match self.inner.write(&buf[..allowed]) {
            IoOutcome::Ok(n) => {
                self.samples.push_back(Sample { at_ms: now.0, bytes: n });
                self.window_bytes += n;
                IoOutcome::Ok(n)
            }
            other => other,
        }
    }

    fn disconnect(&mut self) -> bool {
        self.inner.disconnect()
    }

    fn destroy(&mut self) {
        self.inner.destroy();
    }

    fn process_event(&mut self, event: &Event) -> LayerAction {
        self.inner.process_event(event)
    }

    fn state(&self) -> LayerState {
        self.inner.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SinkLeaf;
    impl Layer for SinkLeaf {
        fn name(&self) -> &str {
            "sink"
        }
        fn write(&mut self, buf: &[u8]) -> IoOutcome<usize> {
            IoOutcome::Ok(buf.len())
        }
        fn state(&self) -> LayerState {
            LayerState::Connected
        }
    }

    #[test]
    fn caps_writes_to_the_configured_window_budget() {
        let mut shaper = BandwidthShaperLeaf::wrap(Box::new(SinkLeaf), 100, 1_000);
        assert!(matches!(shaper.write(&[0u8; 60]), IoOutcome::Ok(60)));
        // Only 40 bytes of budget remain in this window.
        assert!(matches!(shaper.write(&[0u8; 60]), IoOutcome::Ok(40)));
        assert!(matches!(shaper.write(&[0u8; 10]), IoOutcome::WouldBlock));
        assert_eq!(shaper.current_window_bytes(), 100);
    }
}
