//! Buffered IPC primitives for worker communication.
//!
//! Line-based I/O over pipes with EINTR handling and a zero-timeout
//! readiness check, so both ends can poll without blocking.

use super::protocol::Recv;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Default buffer size for IPC (64KB).
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// A file descriptor wrapper that implements Read/Write with EINTR handling.
pub struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    /// Create from an owned file descriptor.
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Create from a raw file descriptor (takes ownership).
    ///
    /// # Safety
    /// The caller must ensure `fd` is a valid file descriptor that can be owned.
    pub unsafe fn from_raw(fd: RawFd) -> Self {
        Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        }
    }

    /// Whether a read would not block: data is waiting or the peer hung up.
    pub fn is_readable(&self) -> io::Result<bool> {
        loop {
            let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::ZERO) {
                Ok(0) => return Ok(false),
                Ok(_) => {
                    let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                    return Ok(revents.intersects(
                        PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR,
                    ));
                }
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PipeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(()) // Pipes don't need flushing at the fd level
    }
}

/// Buffered line reader for IPC.
pub struct LineReader {
    reader: BufReader<PipeFd>,
    line_buffer: String,
}

impl LineReader {
    /// Create a new line reader from a file descriptor.
    pub fn new(fd: PipeFd) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, fd),
            line_buffer: String::with_capacity(4096),
        }
    }

    /// Read a line, returning a reference to the internal buffer.
    /// Returns `None` on EOF.
    pub fn read_line(&mut self) -> io::Result<Option<&str>> {
        self.line_buffer.clear();
        match self.reader.read_line(&mut self.line_buffer)? {
            0 => Ok(None),
            _ => {
                if self.line_buffer.ends_with('\n') {
                    self.line_buffer.pop();
                }
                if self.line_buffer.ends_with('\r') {
                    self.line_buffer.pop();
                }
                Ok(Some(&self.line_buffer))
            }
        }
    }

    /// Read a line only if one can be started without blocking.
    ///
    /// Bytes already sitting in the userspace buffer count as readable; the
    /// fd alone would not report them.
    pub fn try_read_line(&mut self) -> io::Result<Recv<String>> {
        let ready = !self.reader.buffer().is_empty() || self.reader.get_ref().is_readable()?;
        if !ready {
            return Ok(Recv::Empty);
        }
        Ok(match self.read_line()? {
            Some(line) => Recv::Message(line.to_string()),
            None => Recv::Closed,
        })
    }
}

/// Buffered line writer for IPC.
pub struct LineWriter {
    writer: BufWriter<PipeFd>,
}

impl LineWriter {
    /// Create a new line writer from a file descriptor.
    pub fn new(fd: PipeFd) -> Self {
        Self {
            writer: BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, fd),
        }
    }

    /// Write a line (appends newline if not present) and flush.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()
    }
}
