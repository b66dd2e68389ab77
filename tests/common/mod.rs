//! Shared fixtures for the cross-module integration suite: one loop per
//! connection pair, mirroring `adapters/net.rs`'s own test of accepting a
//! pending connection directly rather than through a generic accept-fanout
//! pipeline (see the architectural-boundary note in `DESIGN.md`): a
//! connection's raw fd and interest are captured from the concrete leaf
//! before it is boxed into an `IoObject`, since `Registerable` is
//! implemented per concrete adapter type, not on `dyn Layer`.

use std::net::{TcpListener as StdTcpListener, TcpStream as StdTcpStream};

use nexio::adapters::net::TcpConnectionLeaf;
use nexio::interest::Interest;
use nexio::loop_::Registerable;

#[cfg(unix)]
use std::os::fd::RawFd;

/// A fixed `(fd, interest)` pair captured from a concrete leaf before it is
/// erased into `Box<dyn Layer>`, so [`nexio::loop_::EventLoop::add`] still
/// has something to register against.
pub struct FixedRegisterable {
    pub fd: RawFd,
    pub interest: Interest,
}

impl Registerable for FixedRegisterable {
    fn raw_fd(&self) -> RawFd {
        self.fd
    }

    fn interest(&self) -> Interest {
        self.interest
    }
}

/// One already-established, nonblocking loopback TCP pair. `connect()`
/// completes as soon as the listener's backlog accepts the handshake, which
/// on loopback happens before `accept()` is even called, so no extra thread
/// or synchronization is needed to set one of these up.
pub struct ConnectedPair {
    pub client: TcpConnectionLeaf,
    pub server: TcpConnectionLeaf,
}

pub fn connected_pair() -> ConnectedPair {
    let listener =
        StdTcpListener::bind("127.0.0.1:0").expect("bind should succeed in a test sandbox");
    let addr = listener.local_addr().unwrap();
    let client_std =
        StdTcpStream::connect(addr).expect("loopback connect should succeed immediately");
    let (server_std, _) = listener
        .accept()
        .expect("listener backlog already holds the completed handshake");
    ConnectedPair {
        client: TcpConnectionLeaf::from_accepted(client_std).unwrap(),
        server: TcpConnectionLeaf::from_accepted(server_std).unwrap(),
    }
}

/// A loopback pair where only the client side becomes a [`TcpConnectionLeaf`];
/// the server side stays a plain blocking `std::net::TcpStream` so a test can
/// observe the connection from outside the event loop's own bookkeeping
/// (e.g. to confirm a shutdown by reading `Ok(0)` directly).
pub struct HalfRawPair {
    pub client: TcpConnectionLeaf,
    pub server_raw: StdTcpStream,
}

pub fn half_raw_pair() -> HalfRawPair {
    let listener =
        StdTcpListener::bind("127.0.0.1:0").expect("bind should succeed in a test sandbox");
    let addr = listener.local_addr().unwrap();
    let client_std =
        StdTcpStream::connect(addr).expect("loopback connect should succeed immediately");
    let (server_raw, _) = listener
        .accept()
        .expect("listener backlog already holds the completed handshake");
    HalfRawPair {
        client: TcpConnectionLeaf::from_accepted(client_std).unwrap(),
        server_raw,
    }
}

/// Captures `(fd, interest)` from a leaf via its `Registerable` impl before
/// the caller boxes it into a layer stack.
pub fn registerable_of(leaf: &TcpConnectionLeaf) -> FixedRegisterable {
    FixedRegisterable {
        fd: leaf.raw_fd(),
        interest: leaf.interest(),
    }
}
