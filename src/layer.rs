//! The layer abstraction: one transformation stage in an I/O object's stack.
//!
//! Modeled as a trait with default no-op methods — a concrete layer
//! overrides only the operations it actually implements, and
//! [`Layer::capabilities`] advertises which overrides are meaningful so
//! [`crate::object::IoObject`] can fail fast (`NotImpl`) rather than
//! silently no-op on an unsupported call.

use std::io;

use crate::buffer::{GrowableBuffer, ParserSink};
use crate::error::IoErrorKind;
use crate::event::Event;

// A small hand-rolled bitflags-shaped macro: the corpus's usual choice
// would be the `bitflags` crate, but a 5-bit capability set with one call
// site does not earn a dependency the rest of the runtime has no other use
// for.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Debug)]
        pub struct $name($ty);

        impl $name {
            $(pub const $variant: $name = $name($value);)*

            pub const fn empty() -> $name {
                $name(0)
            }

            pub const fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn union(self, other: $name) -> $name {
                $name(self.0 | other.0)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, other: $name) -> $name {
                self.union(other)
            }
        }
    };
}

bitflags_like! {
    /// Which of the optional operations a layer implements.
    pub struct Capability: u16 {
        const READ = 0b0000_0001;
        const WRITE = 0b0000_0010;
        const ACCEPT = 0b0000_0100;
        const RECONNECT = 0b0000_1000;
        const OWNS_HANDLE = 0b0001_0000;
    }
}

/// A layer's response to an incoming event at `process_event` time.
pub enum LayerAction {
    /// Stop propagation; the event never reaches a higher layer.
    Consume,
    /// Deliver the event unchanged to the next layer up.
    Pass,
    /// Deliver a different event upward instead of the original.
    Rewrite(Event),
    /// Synthesize an event to be re-queued on the next loop iteration,
    /// toward the user (`Direction::Up`) or toward the OS layer
    /// (`Direction::Down`).
    Inject(Direction, Event),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Direction {
    Up,
    Down,
}

/// Outcome of a `read`/`write`/`accept` call on a single layer.
pub enum IoOutcome<T> {
    Ok(T),
    WouldBlock,
    Err(IoErrorKind),
}

/// One transformation stage in an [`crate::object::IoObject`]'s layer
/// stack.
///
/// Every method has a default that reports the operation unsupported; a
/// concrete layer overrides exactly the subset named in its
/// [`Layer::capabilities`].
pub trait Layer: Send {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.0.0"
    }

    fn capabilities(&self) -> Capability {
        Capability::empty()
    }

    fn init(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Serve bytes from this layer's own buffer, translate from a lower
    /// layer, or report `WouldBlock`.
    fn read(&mut self, _buf: &mut [u8]) -> IoOutcome<usize> {
        IoOutcome::Err(IoErrorKind::NotImpl)
    }

    fn read_into(&mut self, _sink: &mut dyn GrowableBuffer) -> IoOutcome<usize> {
        IoOutcome::Err(IoErrorKind::NotImpl)
    }

    fn read_into_parser(&mut self, _sink: &mut dyn ParserSink) -> IoOutcome<usize> {
        IoOutcome::Err(IoErrorKind::NotImpl)
    }

    /// Every successful write returns bytes <= requested; a layer that
    /// cannot accept all bytes buffers the remainder and reports
    /// `WouldBlock`, but must ensure a future WRITE event follows.
    fn write(&mut self, _buf: &[u8]) -> IoOutcome<usize> {
        IoOutcome::Err(IoErrorKind::NotImpl)
    }

    /// Produces a fully-formed new leaf (and its own mid-stack layers) when
    /// this layer is a listener.
    fn accept(&mut self) -> IoOutcome<Box<dyn Layer>> {
        IoOutcome::Err(IoErrorKind::NotImpl)
    }

    /// Initiates graceful shutdown at this layer; `true` once this layer
    /// has nothing left to flush.
    fn disconnect(&mut self) -> bool {
        true
    }

    fn reset(&mut self) {}

    fn destroy(&mut self) {}

    /// Bottom-up event propagation is a method on the layer, not a free
    /// function, so a layer can hold whatever state it needs to decide how
    /// to react.
    fn process_event(&mut self, event: &Event) -> LayerAction {
        let _ = event;
        LayerAction::Pass
    }

    fn errormsg(&self) -> Option<String> {
        None
    }

    /// This layer's view of the connection state; the object aggregates
    /// these with "lowest rank wins."
    fn state(&self) -> LayerState {
        LayerState::Connected
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub enum LayerState {
    Init,
    Listening,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_union_and_contains() {
        let caps = Capability::READ | Capability::WRITE;
        assert!(caps.contains(Capability::READ));
        assert!(caps.contains(Capability::WRITE));
        assert!(!caps.contains(Capability::ACCEPT));
    }

    #[test]
    fn layer_state_ranks_order_init_below_connected() {
        assert!(LayerState::Init < LayerState::Connected);
        assert!(LayerState::Connected < LayerState::Disconnecting);
        assert!(LayerState::Disconnecting < LayerState::Error);
    }
}
