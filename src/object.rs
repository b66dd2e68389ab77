//! The I/O object: an ordered stack of layers, public read/write/accept/
//! disconnect/destroy operations, event propagation, and the trace hook.

use std::fmt;

use crate::buffer::{GrowableBuffer, ParserSink};
use crate::error::IoErrorKind;
use crate::event::{Event, EventKind};
use crate::layer::{Direction, IoOutcome, Layer, LayerAction, LayerState};
use crate::token::Token;

/// The object's shape, used to reject operations that make no sense for it
/// (e.g. `accept()` on a non-listener) without depending on layer
/// introspection at every call site.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ObjectKind {
    Stream,
    Writer,
    Reader,
    Listener,
    Event,
}

/// Object-wide state, derived from layers as the lowest rank across all of
/// them.
pub type ObjectState = LayerState;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TraceKind {
    Read,
    Write,
    Event,
}

/// An observer that sees raw bytes and events without altering them. At
/// most one may be installed per object.
pub trait TraceHook: Send {
    fn on_read(&mut self, _layer_index: usize, _bytes: &[u8]) {}
    fn on_write(&mut self, _layer_index: usize, _bytes: &[u8]) {}
    fn on_event(&mut self, _event: &Event) {}
}

/// A single soft event queued by a layer or the user, consumed by the
/// owning [`crate::loop_::EventLoop`]'s FIFO.
pub struct SoftEvent {
    pub token: Token,
    pub direction: Direction,
    pub event: Event,
}

/// An ordered stack of layers behind one public read/write/accept surface.
pub struct IoObject {
    kind: ObjectKind,
    layers: Vec<Box<dyn Layer>>,
    last_error: Option<(IoErrorKind, String)>,
    trace: Option<Box<dyn TraceHook>>,
    token: Option<Token>,
    terminal_delivered: bool,
}

impl fmt::Debug for IoObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoObject")
            .field("kind", &self.kind)
            .field("layers", &self.layers.iter().map(|l| l.name()).collect::<Vec<_>>())
            .field("state", &self.state())
            .finish()
    }
}

impl IoObject {
    /// The layer sequence is fixed at construction and never changes after;
    /// `layers[0]` is the leaf, `layers[last]` is what the user reads from
    /// and writes to.
    pub fn new(kind: ObjectKind, layers: Vec<Box<dyn Layer>>) -> IoObject {
        assert!(!layers.is_empty(), "an io object needs at least a leaf layer");
        IoObject {
            kind,
            layers,
            last_error: None,
            trace: None,
            token: None,
            terminal_delivered: false,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn set_trace_hook(&mut self, hook: Box<dyn TraceHook>) {
        self.trace = Some(hook);
    }

    pub fn token(&self) -> Option<Token> {
        self.token
    }

    pub(crate) fn set_token(&mut self, token: Token) {
        self.token = Some(token);
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [Box<dyn Layer>] {
        &mut self.layers
    }

    /// Object state is the lowest rank across all layers: a layer still
    /// `Connecting` (e.g. a TLS handshake) holds the whole object in
    /// `Connecting` even if the leaf below is `Connected`.
    pub fn state(&self) -> ObjectState {
        self.layers
            .iter()
            .map(|l| l.state())
            .min()
            .unwrap_or(ObjectState::Error)
    }

    pub fn get_error_string(&self) -> Option<&str> {
        self.last_error.as_ref().map(|(_, msg)| msg.as_str())
    }

    fn fail(&mut self, kind: IoErrorKind, msg: impl Into<String>) {
        self.last_error = Some((kind, msg.into()));
    }

    fn check_usable(&self) -> Result<(), IoErrorKind> {
        if self.terminal_delivered {
            return Err(IoErrorKind::NotConnected);
        }
        Ok(())
    }

    /// Reads through the top layer; a layer that cannot serve bytes on its
    /// own issues a lower-layer read itself (TLS decrypting ciphertext is
    /// the canonical example), so this simply delegates to the top layer.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, IoErrorKind> {
        self.check_usable()?;
        if self.state() == ObjectState::Connecting {
            return Err(IoErrorKind::NotConnected);
        }
        let top = self.layers.len() - 1;
        match self.layers[top].read(buf) {
            IoOutcome::Ok(n) => {
                if let Some(trace) = &mut self.trace {
                    trace.on_read(top, &buf[..n]);
                }
                // A successful read of zero bytes never happens — a layer
                // returning Ok(0) is a contract bug we surface as a generic
                // error rather than a silent success.
                if n == 0 {
                    Err(IoErrorKind::Error)
                } else {
                    Ok(n)
                }
            }
            IoOutcome::WouldBlock => Err(IoErrorKind::WouldBlock),
            IoOutcome::Err(e) => {
                self.fail(e, format!("read failed: {e}"));
                Err(e)
            }
        }
    }

    pub fn read_into(&mut self, sink: &mut dyn GrowableBuffer) -> Result<usize, IoErrorKind> {
        self.check_usable()?;
        let top = self.layers.len() - 1;
        match self.layers[top].read_into(sink) {
            IoOutcome::Ok(n) => Ok(n),
            IoOutcome::WouldBlock => Err(IoErrorKind::WouldBlock),
            IoOutcome::Err(e) => {
                self.fail(e, format!("read_into failed: {e}"));
                Err(e)
            }
        }
    }

    pub fn read_into_parser(&mut self, sink: &mut dyn ParserSink) -> Result<usize, IoErrorKind> {
        self.check_usable()?;
        let top = self.layers.len() - 1;
        match self.layers[top].read_into_parser(sink) {
            IoOutcome::Ok(n) => Ok(n),
            IoOutcome::WouldBlock => Err(IoErrorKind::WouldBlock),
            IoOutcome::Err(e) => {
                self.fail(e, format!("read_into_parser failed: {e}"));
                Err(e)
            }
        }
    }

    /// Writing to a `Connecting` object returns `NotConnected`.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, IoErrorKind> {
        self.check_usable()?;
        match self.state() {
            ObjectState::Connecting | ObjectState::Init => return Err(IoErrorKind::NotConnected),
            ObjectState::Disconnected | ObjectState::Disconnecting | ObjectState::Error => {
                return Err(IoErrorKind::NotConnected)
            }
            _ => {}
        }
        let top = self.layers.len() - 1;
        match self.layers[top].write(buf) {
            IoOutcome::Ok(n) => {
                if let Some(trace) = &mut self.trace {
                    trace.on_write(top, &buf[..n]);
                }
                Ok(n)
            }
            IoOutcome::WouldBlock => Err(IoErrorKind::WouldBlock),
            IoOutcome::Err(e) => {
                self.fail(e, format!("write failed: {e}"));
                Err(e)
            }
        }
    }

    /// A listener produces a new object inheriting the same layer recipe (a
    /// fresh accept always returns a brand new leaf, so the "recipe" here
    /// is the layers above the leaf, reapplied by the listener's own
    /// `accept()` impl).
    pub fn accept(&mut self) -> Result<IoObject, IoErrorKind> {
        self.check_usable()?;
        if self.kind != ObjectKind::Listener {
            return Err(IoErrorKind::NotImpl);
        }
        let top = self.layers.len() - 1;
        match self.layers[top].accept() {
            IoOutcome::Ok(leaf) => Ok(IoObject::new(ObjectKind::Stream, vec![leaf])),
            IoOutcome::WouldBlock => Err(IoErrorKind::WouldBlock),
            IoOutcome::Err(e) => {
                self.fail(e, format!("accept failed: {e}"));
                Err(e)
            }
        }
    }

    /// Walks top-down; idempotent after the first call.
    pub fn disconnect(&mut self) {
        if self.state() == ObjectState::Disconnected || self.state() == ObjectState::Disconnecting
        {
            return;
        }
        for layer in self.layers.iter_mut().rev() {
            layer.disconnect();
        }
    }

    /// Immediate teardown, idempotent. The caller (loop or pool) is
    /// responsible for deferring a cross-thread destroy request to the
    /// owning thread; this method is the synchronous,
    /// already-on-owning-thread half of that contract.
    pub fn destroy(&mut self) {
        for layer in self.layers.iter_mut() {
            layer.destroy();
        }
        self.terminal_delivered = true;
    }

    /// An event is injected at the bottom layer and walked upward. Returns
    /// the final event to deliver to the user callback (`None` if a layer
    /// consumed it), plus any soft events layers injected along the way.
    pub fn propagate(&mut self, mut event: Event) -> (Option<Event>, Vec<(Direction, Event)>) {
        let mut injected = Vec::new();
        for layer in self.layers.iter_mut() {
            match layer.process_event(&event) {
                LayerAction::Consume => return (None, injected),
                LayerAction::Pass => {}
                LayerAction::Rewrite(new_event) => event = new_event,
                LayerAction::Inject(direction, soft) => injected.push((direction, soft)),
            }
        }
        if let Some(trace) = &mut self.trace {
            trace.on_event(&event);
        }
        if event.is_terminal() {
            self.terminal_delivered = true;
            if matches!(event.kind(), EventKind::Error) {
                let kind = event.io_error().unwrap_or(IoErrorKind::Error);
                let msg = event
                    .context()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{kind}"));
                self.fail(kind, msg);
            }
        }
        (Some(event), injected)
    }

    /// Whether a terminal event (disconnect or error) has been delivered
    /// for this object. Used by tests and by callers that want to check the
    /// event-sequence invariant themselves: `CONNECTED (READ|WRITE|OTHER)*
    /// (DISCONNECTED|ERROR)?`.
    pub fn has_delivered_terminal(&self) -> bool {
        self.terminal_delivered
    }
}

/// Validates the event-sequence invariant over a recorded sequence of
/// delivered event kinds: a terminal event (disconnect or error) may only
/// appear last, and `CONNECTED` may only appear first. Exposed for tests
/// exercising multiple objects.
pub fn is_valid_event_sequence(kinds: &[EventKind]) -> bool {
    let mut seen_connected = false;
    let mut terminal_seen = false;
    for (i, kind) in kinds.iter().enumerate() {
        if terminal_seen {
            return false;
        }
        match kind {
            EventKind::Connected => {
                if i != 0 {
                    return false;
                }
                seen_connected = true;
            }
            EventKind::Read | EventKind::Write | EventKind::Other => {
                if !seen_connected && i == 0 {
                    // Accept-originated streams may start directly with
                    // traffic if CONNECTED was suppressed by policy; the
                    // invariant only forbids a terminal event appearing
                    // before any other kind, not requiring CONNECTED.
                }
            }
            EventKind::Disconnect | EventKind::Error => {
                terminal_seen = true;
            }
            EventKind::Accept => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Capability;

    struct EchoLeaf {
        state: LayerState,
        inbox: Vec<u8>,
    }

    impl Layer for EchoLeaf {
        fn name(&self) -> &str {
            "echo-leaf"
        }

        fn capabilities(&self) -> Capability {
            Capability::READ | Capability::WRITE
        }

        fn read(&mut self, buf: &mut [u8]) -> IoOutcome<usize> {
            if self.inbox.is_empty() {
                return IoOutcome::WouldBlock;
            }
            let n = buf.len().min(self.inbox.len());
            buf[..n].copy_from_slice(&self.inbox[..n]);
            self.inbox.drain(..n);
            IoOutcome::Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> IoOutcome<usize> {
            self.inbox.extend_from_slice(buf);
            IoOutcome::Ok(buf.len())
        }

        fn state(&self) -> LayerState {
            self.state
        }
    }

    #[test]
    fn write_then_read_round_trips_through_single_layer() {
        let mut obj = IoObject::new(
            ObjectKind::Stream,
            vec![Box::new(EchoLeaf {
                state: LayerState::Connected,
                inbox: Vec::new(),
            })],
        );
        assert_eq!(obj.write(b"hello").unwrap(), 5);
        let mut buf = [0u8; 16];
        let n = obj.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn write_to_connecting_object_is_not_connected() {
        let mut obj = IoObject::new(
            ObjectKind::Stream,
            vec![Box::new(EchoLeaf {
                state: LayerState::Connecting,
                inbox: Vec::new(),
            })],
        );
        assert_eq!(obj.write(b"x"), Err(IoErrorKind::NotConnected));
    }

    #[test]
    fn read_with_empty_inbox_would_block_not_zero_bytes() {
        let mut obj = IoObject::new(
            ObjectKind::Stream,
            vec![Box::new(EchoLeaf {
                state: LayerState::Connected,
                inbox: Vec::new(),
            })],
        );
        let mut buf = [0u8; 4];
        assert_eq!(obj.read(&mut buf), Err(IoErrorKind::WouldBlock));
    }

    #[test]
    fn disconnect_is_idempotent() {
        struct CountingLeaf(u32, LayerState);
        impl Layer for CountingLeaf {
            fn name(&self) -> &str {
                "counting-leaf"
            }
            fn disconnect(&mut self) -> bool {
                self.0 += 1;
                self.1 = LayerState::Disconnected;
                true
            }
            fn state(&self) -> LayerState {
                self.1
            }
        }
        let mut obj = IoObject::new(
            ObjectKind::Stream,
            vec![Box::new(CountingLeaf(0, LayerState::Connected))],
        );
        obj.disconnect();
        obj.disconnect();
        // Second call is a no-op because state is already Disconnected;
        // verified indirectly via state staying Disconnected.
        assert_eq!(obj.state(), LayerState::Disconnected);
    }

    #[test]
    fn multi_layer_lowest_rank_wins() {
        struct Fixed(LayerState);
        impl Layer for Fixed {
            fn name(&self) -> &str {
                "fixed"
            }
            fn state(&self) -> LayerState {
                self.0
            }
        }
        let obj = IoObject::new(
            ObjectKind::Stream,
            vec![
                Box::new(Fixed(LayerState::Connected)),
                Box::new(Fixed(LayerState::Connecting)),
            ],
        );
        assert_eq!(obj.state(), LayerState::Connecting);
    }

    #[test]
    fn event_sequence_rejects_anything_after_a_terminal_event() {
        assert!(is_valid_event_sequence(&[
            EventKind::Connected,
            EventKind::Read,
            EventKind::Disconnect,
        ]));
        assert!(!is_valid_event_sequence(&[
            EventKind::Connected,
            EventKind::Disconnect,
            EventKind::Read,
        ]));
    }
}
