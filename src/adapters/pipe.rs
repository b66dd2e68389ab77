//! In-process bidirectional pipe adapter: inter-loop signaling without
//! going through the network stack.
//!
//! Built the same way [`crate::sys::Waker`] builds its self-pipe
//! (`pipe2(O_CLOEXEC | O_NONBLOCK)`), but exposing both the read and write
//! ends as full [`Layer`]s instead of a write-only wake primitive, and
//! returning a connected pair rather than one end plus an implicit
//! loop-owned other end.

use std::io;

use crate::error::IoErrorKind;
use crate::interest::Interest;
use crate::layer::{Capability, IoOutcome, Layer, LayerState};
use crate::loop_::Registerable;

#[cfg(unix)]
mod unix_pipe {
    use super::*;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

    pub struct PipeEndLeaf {
        read: OwnedFd,
        write: OwnedFd,
    }

    impl PipeEndLeaf {
        fn from_fds(read: OwnedFd, write: OwnedFd) -> PipeEndLeaf {
            PipeEndLeaf { read, write }
        }
    }

    impl Layer for PipeEndLeaf {
        fn name(&self) -> &str {
            "pipe-end"
        }

        fn capabilities(&self) -> Capability {
            Capability::READ | Capability::WRITE
        }

        fn read(&mut self, buf: &mut [u8]) -> IoOutcome<usize> {
            let n = unsafe {
                libc::read(
                    self.read.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n >= 0 {
                IoOutcome::Ok(n as usize)
            } else {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    IoOutcome::WouldBlock
                } else {
                    IoOutcome::Err(IoErrorKind::from_io_error(&err))
                }
            }
        }

        fn write(&mut self, buf: &[u8]) -> IoOutcome<usize> {
            let n = unsafe {
                libc::write(
                    self.write.as_raw_fd(),
                    buf.as_ptr() as *const libc::c_void,
                    buf.len(),
                )
            };
            if n >= 0 {
                IoOutcome::Ok(n as usize)
            } else {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    IoOutcome::WouldBlock
                } else {
                    IoOutcome::Err(IoErrorKind::from_io_error(&err))
                }
            }
        }

        fn state(&self) -> LayerState {
            LayerState::Connected
        }
    }

    impl Registerable for PipeEndLeaf {
        fn raw_fd(&self) -> RawFd {
            self.read.as_raw_fd()
        }

        fn interest(&self) -> Interest {
            Interest::READABLE | Interest::WRITABLE
        }
    }

    /// Two fd-pairs wired crosswise: what `a` writes, `b` reads, and vice
    /// versa.
    pub fn pair() -> io::Result<(PipeEndLeaf, PipeEndLeaf)> {
        let mut a_to_b = [0; 2];
        let mut b_to_a = [0; 2];
        unsafe {
            if libc::pipe2(a_to_b.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::pipe2(b_to_a.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        let (a_to_b_read, a_to_b_write) = unsafe {
            (
                OwnedFd::from_raw_fd(a_to_b[0]),
                OwnedFd::from_raw_fd(a_to_b[1]),
            )
        };
        let (b_to_a_read, b_to_a_write) = unsafe {
            (
                OwnedFd::from_raw_fd(b_to_a[0]),
                OwnedFd::from_raw_fd(b_to_a[1]),
            )
        };
        let a = PipeEndLeaf::from_fds(b_to_a_read, a_to_b_write);
        let b = PipeEndLeaf::from_fds(a_to_b_read, b_to_a_write);
        Ok((a, b))
    }
}

#[cfg(unix)]
pub use unix_pipe::{pair, PipeEndLeaf};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_on_one_end_are_readable_on_the_other() {
        let (mut a, mut b) = pair().expect("pipe2 should succeed in a test sandbox");
        assert!(matches!(a.write(b"ping"), IoOutcome::Ok(4)));
        let mut buf = [0u8; 8];
        let n = match b.read(&mut buf) {
            IoOutcome::Ok(n) => n,
            other => panic!("expected data, got a would-block or error: {:?}", debug_outcome(&other)),
        };
        assert_eq!(&buf[..n], b"ping");
        assert!(matches!(a.read(&mut buf), IoOutcome::WouldBlock));
    }

    fn debug_outcome(o: &IoOutcome<usize>) -> &'static str {
        match o {
            IoOutcome::Ok(_) => "ok",
            IoOutcome::WouldBlock => "would_block",
            IoOutcome::Err(_) => "err",
        }
    }
}
