//! Duplex channel endpoints.
//!
//! A [`Connection`] is one end of a Unix domain socket pair. Messages are
//! length-prefixed: 4-byte length (u32 LE) + payload.

use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::config::DEFAULT_MAX_FRAME_LEN;
use crate::error::{Error, Result};

/// Largest payload a `u32` length header can describe.
const MAX_WIRE_FRAME_LEN: usize = u32::MAX as usize;

/// One endpoint of a duplex byte channel.
///
/// Sends and receives are each serialized by an internal lock, so an
/// endpoint can be shared between threads without interleaving frames.
#[derive(Debug)]
pub struct Connection {
    stream: UnixStream,
    max_frame_len: usize,
    send_lock: Mutex<()>,
    recv_lock: Mutex<()>,
}

impl Connection {
    /// Create a linked pair of endpoints.
    pub fn pair() -> Result<(Self, Self)> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self::from(a), Self::from(b)))
    }

    /// Endpoint over this process's stdin.
    ///
    /// Used by worker processes whose parent wired a socket onto fd 0.
    pub fn from_stdin() -> Result<Self> {
        let fd = std::io::stdin().as_fd().try_clone_to_owned()?;
        Ok(Self::from(UnixStream::from(fd)))
    }

    /// Endpoint over this process's stdout.
    pub fn from_stdout() -> Result<Self> {
        let fd = std::io::stdout().as_fd().try_clone_to_owned()?;
        Ok(Self::from(UnixStream::from(fd)))
    }

    /// Override the maximum accepted frame size.
    ///
    /// Clamped to `u32::MAX`, the largest length the frame header can carry.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len.min(MAX_WIRE_FRAME_LEN);
        self
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Send one frame, blocking until it is fully written.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_frame_len {
            return Err(Error::InvalidOperation(format!(
                "message too large: {} bytes (limit {})",
                payload.len(),
                self.max_frame_len
            )));
        }

        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);

        let _guard = self.send_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut writer = &self.stream;
        writer.write_all(&frame).map_err(Error::from_io)?;
        writer.flush().map_err(Error::from_io)
    }

    /// Receive one frame, blocking until it arrives.
    ///
    /// Returns [`Error::Closed`] once the peer has closed its end.
    pub fn recv(&self) -> Result<Vec<u8>> {
        let _guard = self.recv_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut reader = &self.stream;

        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes).map_err(Error::from_io)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > self.max_frame_len {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("message too large: {} bytes", len),
            )));
        }

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).map_err(Error::from_io)?;
        Ok(payload)
    }

    /// Wait up to `timeout` for the endpoint to become readable.
    ///
    /// Does not consume anything. A hung-up peer counts as readable so the
    /// next [`recv`](Self::recv) can report the closure.
    pub fn poll(&self, timeout: Duration) -> Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.stream.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

        loop {
            // SAFETY: `pfd` is a valid pollfd for the duration of the call and
            // the fd is owned by `self.stream`.
            let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if rc >= 0 {
                break;
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(Error::Io(err));
            }
        }

        Ok(pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
    }

    /// Shut the socket down in both directions.
    ///
    /// The peer observes end-of-stream; later operations on this endpoint fail.
    pub fn close(&self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl From<UnixStream> for Connection {
    fn from(stream: UnixStream) -> Self {
        Self {
            stream,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            send_lock: Mutex::new(()),
            recv_lock: Mutex::new(()),
        }
    }
}

impl From<Connection> for OwnedFd {
    fn from(conn: Connection) -> Self {
        OwnedFd::from(conn.stream)
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl AsFd for Connection {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_frame_roundtrip() {
        let (a, b) = Connection::pair().unwrap();
        a.send(b"hello").unwrap();
        a.send(b"").unwrap();

        assert_eq!(b.recv().unwrap(), b"hello");
        assert!(b.recv().unwrap().is_empty());
    }

    #[test]
    fn test_duplex() {
        let (a, b) = Connection::pair().unwrap();
        a.send(b"ping").unwrap();
        b.send(b"pong").unwrap();
        assert_eq!(b.recv().unwrap(), b"ping");
        assert_eq!(a.recv().unwrap(), b"pong");
    }

    #[test]
    fn test_recv_after_peer_drop_is_closed() {
        let (a, b) = Connection::pair().unwrap();
        drop(a);
        assert!(matches!(b.recv(), Err(Error::Closed)));
    }

    #[test]
    fn test_send_after_peer_drop_is_closed() {
        let (a, b) = Connection::pair().unwrap();
        drop(b);
        assert!(matches!(a.send(b"lost"), Err(Error::Closed)));
    }

    #[test]
    fn test_poll() {
        let (a, b) = Connection::pair().unwrap();
        assert!(!b.poll(Duration::ZERO).unwrap());

        a.send(b"x").unwrap();
        assert!(b.poll(Duration::ZERO).unwrap());
        // Polling does not consume.
        assert!(b.poll(Duration::ZERO).unwrap());

        b.recv().unwrap();
        assert!(!b.poll(Duration::ZERO).unwrap());
    }

    #[test]
    fn test_poll_waits_for_data() {
        let (a, b) = Connection::pair().unwrap();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            a.send(b"late").unwrap();
            a
        });

        assert!(b.poll(Duration::from_secs(5)).unwrap());
        writer.join().unwrap();
    }

    #[test]
    fn test_poll_sees_hangup() {
        let (a, b) = Connection::pair().unwrap();
        a.close().unwrap();
        assert!(b.poll(Duration::ZERO).unwrap());
        assert!(matches!(b.recv(), Err(Error::Closed)));
    }

    #[test]
    fn test_frame_limit() {
        let (a, b) = Connection::pair().unwrap();
        let a = a.with_max_frame_len(4);
        let b = b.with_max_frame_len(4);

        assert!(matches!(a.send(b"too long"), Err(Error::InvalidOperation(_))));

        // Peer announcing an oversized frame is rejected on receipt.
        let raw = a.with_max_frame_len(1024);
        raw.send(b"too long").unwrap();
        assert!(matches!(b.recv(), Err(Error::Io(_))));
    }

    #[test]
    fn test_frame_limit_clamped_to_header_width() {
        let (a, _b) = Connection::pair().unwrap();
        let a = a.with_max_frame_len(usize::MAX);
        assert_eq!(a.max_frame_len(), u32::MAX as usize);
    }
}
