//! OS readiness multiplexer backend, selected at compile time.
//!
//! Only the `Selector`/`Waker` surface the loop needs is implemented per
//! platform; platform-native integrations are behavioral equivalents, not
//! API equivalents, so each backend is its own small module rather than a
//! byte-for-byte port of the OS's native interface.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::{RawFd, Selector, Waker};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::{RawFd, Selector, Waker};
