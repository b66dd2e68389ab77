//! Events delivered through an [`crate::object::IoObject`]'s layer stack.
//!
//! An `Event` pairs a tagged `EventKind` with an optional I/O-error kind and
//! the `Token` of the object it targets, and the growable `Events` buffer
//! collects everything one OS-mux poll produced in a single pass.

use std::fmt;

use crate::error::IoErrorKind;
use crate::token::Token;

/// The kinds of event the user callback can observe, plus the two internal
/// readiness kinds (`Read`/`Write`) a leaf layer sees before they are
/// interpreted.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum EventKind {
    Connected,
    Accept,
    Read,
    Write,
    Disconnect,
    Error,
    /// User-posted soft events and timer fires that target an object.
    Other,
}

/// An immutable event, once enqueued never mutated in place — a layer that
/// wants to change an event's kind returns [`crate::layer::LayerAction::Rewrite`]
/// with a new `Event` rather than mutating the one it was handed.
#[derive(Clone, Debug)]
pub struct Event {
    kind: EventKind,
    token: Token,
    io_error: Option<IoErrorKind>,
    context: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind, token: Token) -> Event {
        Event {
            kind,
            token,
            io_error: None,
            context: None,
        }
    }

    pub fn with_error(kind: EventKind, token: Token, io_error: IoErrorKind) -> Event {
        Event {
            kind,
            token,
            io_error: Some(io_error),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Event {
        self.context = Some(context.into());
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn io_error(&self) -> Option<IoErrorKind> {
        self.io_error
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// True for the two kinds an object receives at most one of, ever.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Disconnect | EventKind::Error)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:?})", self.kind, self.token)?;
        if let Some(err) = self.io_error {
            write!(f, " [{err}]")?;
        }
        Ok(())
    }
}

/// A reusable, growable buffer of events produced by one OS-mux poll: a
/// `Vec`-backed buffer the loop clears and refills every iteration instead
/// of allocating fresh each time.
#[derive(Debug, Default)]
pub struct Events {
    inner: Vec<Event>,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Events {
        Events {
            inner: Vec::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn push(&mut self, event: Event) {
        self.inner.push(event);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.inner.iter()
    }
}

impl<'a> IntoIterator for &'a Events {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_events_are_tagged_correctly() {
        let token = Token(0);
        assert!(Event::new(EventKind::Disconnect, token).is_terminal());
        assert!(Event::with_error(EventKind::Error, token, IoErrorKind::ConnReset).is_terminal());
        assert!(!Event::new(EventKind::Read, token).is_terminal());
    }

    #[test]
    fn events_buffer_clears_between_polls() {
        let mut events = Events::with_capacity(4);
        events.push(Event::new(EventKind::Read, Token(1)));
        assert_eq!(events.len(), 1);
        events.clear();
        assert!(events.is_empty());
    }
}
