//! The I/O error taxonomy a [`crate::layer::Layer`] maps OS errors into,
//! plus the loop-level misuse errors.
//!
//! Renamed to Rust conventions and without numeric discriminants, since
//! nothing in this crate serializes them on the wire.

use std::fmt;
use std::io;

/// Per-operation I/O error taxonomy.
///
/// `Interrupted` is carried for completeness but is never returned to a
/// caller; transient errors are retried inside the loop instead.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum IoErrorKind {
    WouldBlock,
    Disconnect,
    Error,
    NotConnected,
    NotPerm,
    ConnReset,
    ConnAborted,
    AddrInUse,
    ProtoNotSupported,
    ConnRefused,
    NetUnreachable,
    TimedOut,
    NoSysResources,
    Invalid,
    NotImpl,
    NotFound,
    Interrupted,
}

impl IoErrorKind {
    /// Maps a raw OS error into the taxonomy. Layers call this at the point
    /// they translate a syscall failure; everything not recognized becomes
    /// `Error`, never invented out of thin air.
    pub fn from_io_error(err: &io::Error) -> IoErrorKind {
        use std::io::ErrorKind as K;
        match err.kind() {
            K::WouldBlock => IoErrorKind::WouldBlock,
            K::NotConnected => IoErrorKind::NotConnected,
            K::PermissionDenied => IoErrorKind::NotPerm,
            K::ConnectionReset => IoErrorKind::ConnReset,
            K::ConnectionAborted => IoErrorKind::ConnAborted,
            K::AddrInUse => IoErrorKind::AddrInUse,
            K::ConnectionRefused => IoErrorKind::ConnRefused,
            K::TimedOut => IoErrorKind::TimedOut,
            K::InvalidInput | K::InvalidData => IoErrorKind::Invalid,
            K::Unsupported => IoErrorKind::NotImpl,
            K::NotFound => IoErrorKind::NotFound,
            K::Interrupted => IoErrorKind::Interrupted,
            _ => IoErrorKind::Error,
        }
    }

    /// Whether this is one of the two transient kinds the loop must retry
    /// internally and never hand to a user callback.
    pub fn is_transient(self) -> bool {
        matches!(self, IoErrorKind::WouldBlock | IoErrorKind::Interrupted)
    }
}

impl fmt::Display for IoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IoErrorKind::WouldBlock => "operation would block",
            IoErrorKind::Disconnect => "connection disconnected during operation",
            IoErrorKind::Error => "generic undefined error",
            IoErrorKind::NotConnected => "connection is not established",
            IoErrorKind::NotPerm => "not a permitted action for this io object",
            IoErrorKind::ConnReset => "connection was reset by peer",
            IoErrorKind::ConnAborted => "connection aborted",
            IoErrorKind::AddrInUse => "address or port already in use",
            IoErrorKind::ProtoNotSupported => "protocol not supported by os",
            IoErrorKind::ConnRefused => "connection refused",
            IoErrorKind::NetUnreachable => "network unreachable",
            IoErrorKind::TimedOut => "operation timed out at the os level",
            IoErrorKind::NoSysResources => "system reported insufficient resources",
            IoErrorKind::Invalid => "invalid use or order of operation",
            IoErrorKind::NotImpl => "os does not implement the command or parameters",
            IoErrorKind::NotFound => "file or path not found",
            IoErrorKind::Interrupted => "interrupted (internal only)",
        };
        f.write_str(s)
    }
}

impl std::error::Error for IoErrorKind {}

/// Loop-level contract violations. Always a programmer error; never
/// retried.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum LoopError {
    /// `run()` called on a loop that already hit an unrecoverable mux error.
    AlreadyDestroyed,
    /// An object was registered with a loop while still attached to another.
    DoubleRegistration,
    /// The OS mux itself failed unrecoverably (not an EINTR-equivalent).
    MuxFailure,
}

impl fmt::Display for LoopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopError::AlreadyDestroyed => "operation on a loop in permanent error state",
            LoopError::DoubleRegistration => "object is already registered with another loop",
            LoopError::MuxFailure => "os multiplexer failed unrecoverably",
        };
        f.write_str(s)
    }
}

impl std::error::Error for LoopError {}
