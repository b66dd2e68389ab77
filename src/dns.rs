//! DNS resolution collaborator: a pluggable resolver, not a core
//! responsibility of the loop itself.
//!
//! The core never blocks the loop thread on a lookup; a [`Resolver`]
//! implementation does the blocking work (or whatever it wants) on its own
//! thread and hands the result back. The default [`ThreadResolver`] is the
//! simplest thing that fits the contract: `std::net::ToSocketAddrs` in a
//! spawned thread, since `getaddrinfo` has no epoll-friendly nonblocking
//! variant to hand-roll against.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::thread;

/// Resolves a host:port pair to one or more socket addresses without
/// blocking the calling loop thread.
///
/// `on_done` is invoked from whatever thread the resolver chooses to finish
/// on, not necessarily the caller's thread; an adapter wires this back into
/// the owning loop as a soft event (`Direction::Up`) rather than calling
/// into `IoObject` directly from a foreign thread.
pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str, port: u16, on_done: Box<dyn FnOnce(io::Result<Vec<SocketAddr>>) + Send>);
}

/// Spawns a short-lived thread per lookup and resolves via
/// `ToSocketAddrs`, the same primitive `std::net::TcpStream::connect` uses
/// internally. Adequate for the connection volumes this runtime targets;
/// a caller resolving thousands of hosts per second should supply its own
/// `Resolver` backed by a resolution pool or an async DNS client.
#[derive(Default, Debug)]
pub struct ThreadResolver;

impl Resolver for ThreadResolver {
    fn resolve(
        &self,
        host: &str,
        port: u16,
        on_done: Box<dyn FnOnce(io::Result<Vec<SocketAddr>>) + Send>,
    ) {
        let host = host.to_owned();
        thread::Builder::new()
            .name("nexio-dns".into())
            .spawn(move || {
                let result = (host.as_str(), port)
                    .to_socket_addrs()
                    .map(|iter| iter.collect::<Vec<_>>());
                on_done(result);
            })
            .expect("failed to spawn dns resolution thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn thread_resolver_resolves_localhost() {
        let resolver = ThreadResolver;
        let (tx, rx) = mpsc::channel();
        resolver.resolve("localhost", 0, Box::new(move |result| {
            let _ = tx.send(result);
        }));
        let result = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert!(result.is_ok());
        assert!(!result.unwrap().is_empty());
    }
}
