//! Windows backend stub.
//!
//! Platform-native integrations (registry, Win32 IOCP, kqueue, epoll) are
//! behavioral equivalents, not API equivalents. The intended production
//! backend here is IOCP: an I/O completion port plus an AFD poll emulation
//! layer for readiness-style semantics. That port isn't built yet, so this
//! module documents the intended design and fails loudly rather than
//! silently degrading to a busy-poll loop.

use std::io;
use std::time::Duration;

use crate::error::LoopError;
use crate::event::Events;
use crate::interest::Interest;
use crate::token::Token;

pub type RawFd = i32;

pub struct Selector;

impl Selector {
    pub fn new(_capacity: usize) -> io::Result<Selector> {
        Err(not_implemented())
    }

    pub fn register(&self, _fd: RawFd, _token: Token, _interests: Interest) -> io::Result<()> {
        Err(not_implemented())
    }

    pub fn reregister(&self, _fd: RawFd, _token: Token, _interests: Interest) -> io::Result<()> {
        Err(not_implemented())
    }

    pub fn deregister(&self, _fd: RawFd) -> io::Result<()> {
        Err(not_implemented())
    }

    pub fn select(&mut self, _out: &mut Events, _timeout: Option<Duration>) -> io::Result<usize> {
        Err(not_implemented())
    }
}

pub struct Waker;

impl Waker {
    pub fn new(_selector: &Selector, _token: Token) -> io::Result<Waker> {
        Err(not_implemented())
    }

    pub fn wake(&self) -> io::Result<()> {
        Err(not_implemented())
    }

    pub fn drain(&self) {}
}

fn not_implemented() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, LoopError::MuxFailure.to_string())
}
