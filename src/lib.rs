//! `nexio`: a layered, event-driven I/O runtime.
//!
//! An [`object::IoObject`] is a fixed stack of [`layer::Layer`]s — the
//! bottom layer owns an OS handle, layers above it may translate, buffer,
//! or suppress reads/writes/events, and the top layer is what a caller
//! reads from and writes to. One or more objects register with an
//! [`loop_::EventLoop`] (or, for parallelism, an [`pool::EventLoopPool`]
//! of loops each on its own thread); the loop demultiplexes OS readiness,
//! timers, and soft events, delivering them down each object's layer stack
//! and finally to the caller's own callback. [`writer::AsyncWriter`] is a
//! separate, independent primitive: a bounded producer/consumer queue with
//! a dedicated worker thread, the substrate a logging sink is built on.
//!
//! Concrete leaf and mid-stack layers live in [`adapters`]: TCP client and
//! listener, an in-process pipe, a child process's stdio, HID report
//! framing, serial-port configuration, bandwidth shaping, and (with the
//! `tls` feature) a rustls-backed TLS layer.
//!
//! # Example
//!
//! ```no_run
//! use nexio::adapters::net::{TcpClientConfig, TcpConnectionLeaf};
//! use nexio::loop_::EventLoop;
//! use nexio::object::{IoObject, ObjectKind};
//!
//! let mut event_loop = EventLoop::new()?;
//! let leaf = TcpConnectionLeaf::connect(
//!     "127.0.0.1:9".parse().unwrap(),
//!     &TcpClientConfig::new("127.0.0.1", 9),
//! )?;
//! let object = IoObject::new(ObjectKind::Stream, vec![Box::new(leaf)]);
//! // `add` borrows the leaf's raw fd through `Registerable` before the
//! // object takes ownership of it, so build the `Registerable` view first
//! // in real code; this snippet only shows the shape of the call.
//! let _ = event_loop.run(Some(0));
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod adapters;
pub mod buffer;
pub mod clock;
pub mod dns;
pub mod error;
pub mod event;
pub mod interest;
pub mod layer;
pub mod loop_;
pub mod object;
pub mod pool;
pub mod sys;
pub mod timer;
pub mod token;
pub mod writer;

pub use error::{IoErrorKind, LoopError};
pub use event::{Event, EventKind};
pub use layer::{Capability, Layer, LayerState};
pub use loop_::{EventLoop, LoopHandle, RunResult};
pub use object::{IoObject, ObjectKind};
pub use pool::EventLoopPool;
pub use timer::{Mode as TimerMode, TimerHandle};
pub use token::Token;
pub use writer::AsyncWriter;
