//! I/O adapters: concrete leaf and mid-stack layers built on top of
//! [`crate::layer::Layer`]. Each adapter's module doc covers its own
//! design notes.

pub mod bwshape;
pub mod hid;
pub mod net;
pub mod pipe;
pub mod process;
pub mod serial;
#[cfg(feature = "tls")]
pub mod tls;
