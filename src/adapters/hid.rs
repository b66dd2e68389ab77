//! HID report-ID framing: a mid-stack layer that prefixes writes with a
//! report-ID byte and strips it from reads.
//!
//! Wraps its inner layer by direct ownership rather than sitting beside it
//! in [`crate::object::IoObject`]'s layer vector — see `DESIGN.md` on why
//! mid-stack transforms compose this way in this crate: `IoObject::read`/
//! `write` only ever call the top layer, so a transform that needs the
//! layer below it owns that layer directly instead of relying on the
//! object to thread calls through every entry in the stack.

use crate::error::IoErrorKind;
use crate::event::Event;
use crate::layer::{Capability, IoOutcome, Layer, LayerAction, LayerState};

/// A device that speaks numbered HID reports presents `report_id` as the
/// first byte of every write and strips it from every read before handing
/// bytes to the caller.
pub struct HidReportLeaf {
    inner: Box<dyn Layer>,
    report_id: u8,
}

impl HidReportLeaf {
    pub fn wrap(inner: Box<dyn Layer>, report_id: u8) -> HidReportLeaf {
        HidReportLeaf { inner, report_id }
    }
}

impl Layer for HidReportLeaf {
    fn name(&self) -> &str {
        "hid-report"
    }

    fn capabilities(&self) -> Capability {
        self.inner.capabilities()
    }

    fn read(&mut self, buf: &mut [u8]) -> IoOutcome<usize> {
        // Read one extra byte of headroom for the report-ID so a
        // maximally-sized caller buffer still gets a full report's payload.
        let mut scratch = vec![0u8; buf.len() + 1];
        match self.inner.read(&mut scratch) {
            IoOutcome::Ok(0) => IoOutcome::Err(IoErrorKind::Error),
            IoOutcome::Ok(n) => {
                let payload = &scratch[1..n];
                buf[..payload.len()].copy_from_slice(payload);
                IoOutcome::Ok(payload.len())
            }
            IoOutcome::WouldBlock => IoOutcome::WouldBlock,
            IoOutcome::Err(e) => IoOutcome::Err(e),
        }
    }

    fn write(&mut self, buf: &[u8]) -> IoOutcome<usize> {
        let mut framed = Vec::with_capacity(buf.len() + 1);
        framed.push(self.report_id);
        framed.extend_from_slice(buf);
        match self.inner.write(&framed) {
            IoOutcome::Ok(n) => IoOutcome::Ok(n.saturating_sub(1)),
            IoOutcome::WouldBlock => IoOutcome::WouldBlock,
            IoOutcome::Err(e) => IoOutcome::Err(e),
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
