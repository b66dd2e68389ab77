//! Unix readiness multiplexer: epoll on Linux, kqueue elsewhere.
//!
//! Both backends share the same register/reregister/deregister/select
//! shape; event-detail accessors are trimmed to read/write/error since this
//! runtime has no AIO/LIO or priority-band consumer. Cross-thread wakeup
//! uses a self-pipe the loop also polls for readability.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

use crate::event::{Event, EventKind, Events};
use crate::interest::Interest;
use crate::token::Token;

pub use std::os::fd::RawFd;

#[cfg(target_os = "linux")]
mod backend {
    use super::*;

    pub struct RawSelector {
        ep: OwnedFd,
    }

    impl RawSelector {
        pub fn new() -> io::Result<RawSelector> {
            let fd = syscall(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
            Ok(RawSelector {
                ep: unsafe { OwnedFd::from_raw_fd(fd) },
            })
        }

        pub fn register(&self, fd: RawFd, token: Token, interests: Interest) -> io::Result<()> {
            let mut ev = libc::epoll_event {
                events: interests_to_epoll(interests),
                u64: token.0 as u64,
            };
            syscall(unsafe {
                libc::epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut ev)
            })
            .map(|_| ())
        }

        pub fn reregister(&self, fd: RawFd, token: Token, interests: Interest) -> io::Result<()> {
            let mut ev = libc::epoll_event {
                events: interests_to_epoll(interests),
                u64: token.0 as u64,
            };
            syscall(unsafe {
                libc::epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_MOD, fd, &mut ev)
            })
            .map(|_| ())
        }

        pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
            syscall(unsafe {
                libc::epoll_ctl(
                    self.ep.as_raw_fd(),
                    libc::EPOLL_CTL_DEL,
                    fd,
                    std::ptr::null_mut(),
                )
            })
            .map(|_| ())
        }

        pub fn select(
            &self,
            raw_events: &mut Vec<libc::epoll_event>,
            timeout: Option<Duration>,
        ) -> io::Result<usize> {
            let timeout_ms = timeout
                .map(|d| {
                    d.checked_add(Duration::from_nanos(999_999))
                        .unwrap_or(d)
                        .as_millis() as libc::c_int
                })
                .unwrap_or(-1);
            raw_events.clear();
            let n = syscall(unsafe {
                libc::epoll_wait(
                    self.ep.as_raw_fd(),
                    raw_events.as_mut_ptr(),
                    raw_events.capacity() as i32,
                    timeout_ms,
                )
            })?;
            unsafe { raw_events.set_len(n as usize) };
            Ok(n as usize)
        }
    }

    fn interests_to_epoll(interests: Interest) -> u32 {
        let mut kind = libc::EPOLLET;
        if interests.is_readable() {
            kind |= libc::EPOLLIN | libc::EPOLLRDHUP;
        }
        if interests.is_writable() {
            kind |= libc::EPOLLOUT;
        }
        kind as u32
    }

    pub fn raw_token(ev: &libc::epoll_event) -> Token {
        Token(ev.u64 as usize)
    }

    pub fn raw_is_readable(ev: &libc::epoll_event) -> bool {
        ev.events as libc::c_int & (libc::EPOLLIN | libc::EPOLLPRI) != 0
    }

    pub fn raw_is_writable(ev: &libc::epoll_event) -> bool {
        ev.events as libc::c_int & libc::EPOLLOUT != 0
    }

    pub fn raw_is_error(ev: &libc::epoll_event) -> bool {
        ev.events as libc::c_int & (libc::EPOLLERR | libc::EPOLLHUP) != 0
    }

    pub type RawEvent = libc::epoll_event;
}

#[cfg(not(target_os = "linux"))]
mod backend {
    use super::*;

    /// kqueue backend, mirroring the epoll backend's
    /// register/reregister/select shape.
    pub struct RawSelector {
        kq: OwnedFd,
    }

    impl RawSelector {
        pub fn new() -> io::Result<RawSelector> {
            let fd = syscall(unsafe { libc::kqueue() })?;
            Ok(RawSelector {
                kq: unsafe { OwnedFd::from_raw_fd(fd) },
            })
        }

        pub fn register(&self, fd: RawFd, token: Token, interests: Interest) -> io::Result<()> {
            self.update(fd, token, interests, libc::EV_ADD | libc::EV_CLEAR)
        }

        pub fn reregister(&self, fd: RawFd, token: Token, interests: Interest) -> io::Result<()> {
            self.update(fd, token, interests, libc::EV_ADD | libc::EV_CLEAR)
        }

        fn update(
            &self,
            fd: RawFd,
            token: Token,
            interests: Interest,
            flags: u16,
        ) -> io::Result<()> {
            let mut changes = Vec::with_capacity(2);
            if interests.is_readable() {
                changes.push(kevent(fd, libc::EVFILT_READ, flags, token));
            }
            if interests.is_writable() {
                changes.push(kevent(fd, libc::EVFILT_WRITE, flags, token));
            }
            syscall(unsafe {
                libc::kevent(
                    self.kq.as_raw_fd(),
                    changes.as_ptr(),
                    changes.len() as i32,
                    std::ptr::null_mut(),
                    0,
                    std::ptr::null(),
                )
            })
            .map(|_| ())
        }

        pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
            let changes = [
                kevent(fd, libc::EVFILT_READ, libc::EV_DELETE, Token(0)),
                kevent(fd, libc::EVFILT_WRITE, libc::EV_DELETE, Token(0)),
            ];
            // Deleting a filter that was never added returns ENOENT; ignore.
            unsafe {
                libc::kevent(
                    self.kq.as_raw_fd(),
                    changes.as_ptr(),
                    changes.len() as i32,
                    std::ptr::null_mut(),
                    0,
                    std::ptr::null(),
                )
            };
            Ok(())
        }

        pub fn select(
            &self,
            raw_events: &mut Vec<libc::kevent>,
            timeout: Option<Duration>,
        ) -> io::Result<usize> {
            let ts = timeout.map(|d| libc::timespec {
                tv_sec: d.as_secs() as libc::time_t,
                tv_nsec: d.subsec_nanos() as libc::c_long,
            });
            raw_events.clear();
            let n = syscall(unsafe {
                libc::kevent(
                    self.kq.as_raw_fd(),
                    std::ptr::null(),
                    0,
                    raw_events.as_mut_ptr(),
                    raw_events.capacity() as i32,
                    ts.as_ref()
                        .map(|t| t as *const _)
                        .unwrap_or(std::ptr::null()),
                )
            })?;
            unsafe { raw_events.set_len(n as usize) };
            Ok(n as usize)
        }
    }

    fn kevent(fd: RawFd, filter: i16, flags: u16, token: Token) -> libc::kevent {
        libc::kevent {
            ident: fd as libc::uintptr_t,
            filter,
            flags,
            fflags: 0,
            data: 0,
            udata: token.0 as *mut libc::c_void,
        }
    }

    pub fn raw_token(ev: &libc::kevent) -> Token {
        Token(ev.udata as usize)
    }

    pub fn raw_is_readable(ev: &libc::kevent) -> bool {
        ev.filter == libc::EVFILT_READ
    }

    pub fn raw_is_writable(ev: &libc::kevent) -> bool {
        ev.filter == libc::EVFILT_WRITE
    }

    pub fn raw_is_error(ev: &libc::kevent) -> bool {
        ev.flags & libc::EV_ERROR != 0
    }

    pub type RawEvent = libc::kevent;
}

use backend::{RawEvent, RawSelector};

fn syscall(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Thin, OS-agnostic wrapper the loop talks to; translates raw epoll/kqueue
/// events into this crate's [`Event`] kind at the boundary — a leaf layer
/// only ever sees `Read`/`Write`/`Error`; higher layers see the richer
/// taxonomy produced by `process_event`.
pub struct Selector {
    raw: RawSelector,
    buf: Vec<RawEvent>,
}

impl Selector {
    pub fn new(capacity: usize) -> io::Result<Selector> {
        Ok(Selector {
            raw: RawSelector::new()?,
            buf: Vec::with_capacity(capacity),
        })
    }

    pub fn register(&self, fd: RawFd, token: Token, interests: Interest) -> io::Result<()> {
        self.raw.register(fd, token, interests)
    }

    pub fn reregister(&self, fd: RawFd, token: Token, interests: Interest) -> io::Result<()> {
        self.raw.reregister(fd, token, interests)
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.raw.deregister(fd)
    }

    /// Polls the OS mux and appends a READ/WRITE/... event into `out` for
    /// each readiness it sees. Returns the number of raw OS events seen
    /// (which may be fewer than events pushed, since one token's readiness
    /// can produce both a read and a write event).
    pub fn select(&mut self, out: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        match self.raw.select(&mut self.buf, timeout) {
            Ok(n) => {
                for raw in &self.buf {
                    let token = backend::raw_token(raw);
                    if backend::raw_is_error(raw) {
                        out.push(Event::new(EventKind::Error, token));
                        continue;
                    }
                    if backend::raw_is_readable(raw) {
                        out.push(Event::new(EventKind::Read, token));
                    }
                    if backend::raw_is_writable(raw) {
                        out.push(Event::new(EventKind::Write, token));
                    }
                }
                Ok(n)
            }
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(err) => Err(err),
        }
    }
}

/// Cross-thread wake primitive: a self-pipe whose read end is registered
/// with the selector, written to by `wake()` from any thread.
pub struct Waker {
    sender: OwnedFd,
    receiver: OwnedFd,
}

impl Waker {
    pub fn new(selector: &Selector, token: Token) -> io::Result<Waker> {
        let mut fds = [0; 2];
        syscall(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) })?;
        let receiver = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let sender = unsafe { OwnedFd::from_raw_fd(fds[1]) };
        selector.register(receiver.as_raw_fd(), token, Interest::READABLE)?;
        Ok(Waker { sender, receiver })
    }

    pub fn wake(&self) -> io::Result<()> {
        let buf = [1u8];
        match syscall(unsafe {
            libc::write(self.sender.as_raw_fd(), buf.as_ptr() as *const _, 1) as libc::c_int
        }) {
            Ok(_) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                self.drain();
                self.wake()
            }
            Err(err) => Err(err),
        }
    }

    pub fn drain(&self) {
        let mut buf = [0u8; 4096];
        loop {
            let n = unsafe {
                libc::read(self.receiver.as_raw_fd(), buf.as_mut_ptr() as *mut _, 4096)
            };
            if n <= 0 {
                return;
            }
        }
    }
}
