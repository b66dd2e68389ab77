//! Child process adapter: spawn a child, present its stdin/stdout/stderr
//! as separate leaf layers plus a control object for signaling.
//!
//! Follows the same "wrap a raw fd, make it non-blocking, implement
//! `Layer::read`/`write` over it" shape as the TCP adapters; here the fd
//! comes from `std::process::Child`'s piped stdio instead of a socket.
//! Unix-only: non-blocking child stdio on Windows needs named-pipe
//! overlapped I/O, which belongs to the same IOCP port as the rest of the
//! Windows backend (see `sys::windows`), not to this adapter.

#[cfg(unix)]
pub use unix::*;

#[cfg(unix)]
mod unix {
    use std::io::{self, Read, Write};
    use std::os::fd::{AsRawFd, RawFd};
    use std::process::{Child, Command, Stdio};

    use crate::error::IoErrorKind;
    use crate::interest::Interest;
    use crate::layer::{Capability, IoOutcome, Layer, LayerState};
    use crate::loop_::Registerable;

    fn set_nonblocking(fd: RawFd) -> io::Result<()> {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Unifies `ChildStdin`/`ChildStdout`/`ChildStderr`'s `AsRawFd` under
    /// one bound so `ProcessPipeLeaf<T>` stays generic over which stdio
    /// stream it wraps.
    pub trait AsRawFdLike {
        fn as_raw_fd_like(&self) -> RawFd;
    }

    impl AsRawFdLike for std::process::ChildStdin {
        fn as_raw_fd_like(&self) -> RawFd {
            self.as_raw_fd()
        }
    }
    impl AsRawFdLike for std::process::ChildStdout {
        fn as_raw_fd_like(&self) -> RawFd {
            self.as_raw_fd()
        }
    }
    impl AsRawFdLike for std::process::ChildStderr {
        fn as_raw_fd_like(&self) -> RawFd {
            self.as_raw_fd()
        }
    }

    /// One direction of a child's stdio, as a leaf layer.
    pub struct ProcessPipeLeaf<T> {
        inner: T,
    }

    impl<T: Read + Write + AsRawFdLike> ProcessPipeLeaf<T> {
        fn new(inner: T) -> io::Result<ProcessPipeLeaf<T>> {
            set_nonblocking(inner.as_raw_fd_like())?;
            Ok(ProcessPipeLeaf { inner })
        }
    }

    impl<T: Read + Write + AsRawFdLike + Send> Layer for ProcessPipeLeaf<T> {
        fn name(&self) -> &str {
            "process-pipe"
        }

        fn capabilities(&self) -> Capability {
            Capability::READ | Capability::WRITE
        }

        fn read(&mut self, buf: &mut [u8]) -> IoOutcome<usize> {
            match self.inner.read(buf) {
                Ok(n) => IoOutcome::Ok(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => IoOutcome::WouldBlock,
                Err(err) => IoOutcome::Err(IoErrorKind::from_io_error(&err)),
            }
        }

        fn write(&mut self, buf: &[u8]) -> IoOutcome<usize> {
            match self.inner.write(buf) {
                Ok(n) => IoOutcome::Ok(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => IoOutcome::WouldBlock,
                Err(err) => IoOutcome::Err(IoErrorKind::from_io_error(&err)),
            }
        }

        fn state(&self) -> LayerState {
            LayerState::Connected
        }
    }

    impl<T: AsRawFdLike> Registerable for ProcessPipeLeaf<T> {
        fn raw_fd(&self) -> RawFd {
            self.inner.as_raw_fd_like()
        }

        fn interest(&self) -> Interest {
            Interest::READABLE | Interest::WRITABLE
        }
    }

    /// Non-I/O handle a caller keeps to signal the child; deliberately not
    /// itself a [`Layer`] — killing a process is not a readiness-driven
    /// operation.
    pub struct ProcessControl {
        child: Child,
    }

    impl ProcessControl {
        pub fn id(&self) -> u32 {
            self.child.id()
        }

        pub fn kill(&mut self) -> io::Result<()> {
            self.child.kill()
        }

        pub fn try_wait(&mut self) -> io::Result<Option<std::process::ExitStatus>> {
            self.child.try_wait()
        }
    }

    pub struct SpawnedProcess {
        pub control: ProcessControl,
        pub stdin: ProcessPipeLeaf<std::process::ChildStdin>,
        pub stdout: ProcessPipeLeaf<std::process::ChildStdout>,
        pub stderr: ProcessPipeLeaf<std::process::ChildStderr>,
    }

    /// Spawns `command` with all three stdio streams piped and set
    /// non-blocking, presenting stdin/stdout/stderr/control as separate
    /// objects.
    pub fn spawn(mut command: Command) -> io::Result<SpawnedProcess> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn()?;
        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");
        Ok(SpawnedProcess {
            stdin: ProcessPipeLeaf::new(stdin)?,
            stdout: ProcessPipeLeaf::new(stdout)?,
            stderr: ProcessPipeLeaf::new(stderr)?,
            control: ProcessControl { child },
        })
    }

}
