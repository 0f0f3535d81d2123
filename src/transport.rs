// ABOUTME: The downward socket dependency: non-blocking recv/send plus readiness waits
// ABOUTME: Implemented for TcpStream directly; a fake in-memory duplex pair backs the test suite

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::Notify;

/// A non-blocking duplex socket, mirroring `tokio::net::TcpStream`'s
/// `try_read`/`try_write`/`readable`/`writable` quartet.
pub trait Transport: Send + Sync {
    /// Non-blocking read. `Ok(0)` means EOF. A would-block condition is
    /// reported as `io::ErrorKind::WouldBlock`.
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Non-blocking write. May write fewer bytes than requested, or `Ok(0)`
    /// if the socket cannot currently accept any data (a `send` returning 0
    /// bytes sets the sticky `write_blocked` flag on the caller's side).
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Resolves once the socket is readable.
    fn readable(&self) -> impl Future<Output = io::Result<()>> + Send;

    /// Resolves once the socket can accept more data.
    fn writable(&self) -> impl Future<Output = io::Result<()>> + Send;
}

impl Transport for TcpStream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }

    fn readable(&self) -> impl Future<Output = io::Result<()>> + Send {
        TcpStream::readable(self)
    }

    fn writable(&self) -> impl Future<Output = io::Result<()>> + Send {
        TcpStream::writable(self)
    }
}

#[derive(Default)]
struct Pipe {
    buf: Mutex<VecDeque<u8>>,
    notify: Notify,
    writer_closed: AtomicBool,
}

impl Pipe {
    fn push(&self, data: &[u8]) {
        let mut buf = self.buf.lock().unwrap();
        buf.extend(data.iter().copied());
        drop(buf);
        self.notify.notify_waiters();
    }

    fn close_writer(&self) {
        self.writer_closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// An in-memory duplex transport for tests: two ends sharing a pair of byte
/// queues, with an optional per-call write cap to simulate a socket that
/// only accepts a handful of bytes at a time.
pub struct DuplexTransport {
    inbox: Arc<Pipe>,
    outbox: Arc<Pipe>,
    max_write_chunk: Option<usize>,
}

impl DuplexTransport {
    /// Create a connected pair. `a`'s writes are `b`'s reads and vice versa.
    pub fn pair() -> (DuplexTransport, DuplexTransport) {
        let a_to_b = Arc::new(Pipe::default());
        let b_to_a = Arc::new(Pipe::default());

        let a = DuplexTransport {
            inbox: b_to_a.clone(),
            outbox: a_to_b.clone(),
            max_write_chunk: None,
        };
        let b = DuplexTransport {
            inbox: a_to_b,
            outbox: b_to_a,
            max_write_chunk: None,
        };
        (a, b)
    }

    /// Cap every `try_write` to at most this many bytes, to exercise the
    /// staging buffer's partial-write handling.
    pub fn with_write_cap(mut self, cap: usize) -> Self {
        self.max_write_chunk = Some(cap);
        self
    }

    /// Simulate the peer closing its end of the socket mid-session: the
    /// other end's next `try_read` (once its inbox drains) observes EOF.
    pub fn close_write_side(&self) {
        self.outbox.close_writer();
    }
}

impl Drop for DuplexTransport {
    fn drop(&mut self) {
        // Mirrors a real socket's fd close: the peer's next read, once it
        // drains whatever was already in flight, observes EOF.
        self.outbox.close_writer();
    }
}

impl Transport for DuplexTransport {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inbox = self.inbox.buf.lock().unwrap();
        if inbox.is_empty() {
            return if self.inbox.writer_closed.load(Ordering::Acquire) {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(inbox.len());
        for slot in buf.iter_mut().take(n) {
            *slot = inbox.pop_front().unwrap();
        }
        Ok(n)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        if self.outbox.writer_closed.load(Ordering::Acquire) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let cap = self.max_write_chunk.unwrap_or(buf.len()).min(buf.len());
        if cap == 0 {
            return Ok(0);
        }
        self.outbox.push(&buf[..cap]);
        Ok(cap)
    }

    fn readable(&self) -> impl Future<Output = io::Result<()>> + Send {
        let inbox = self.inbox.clone();
        async move {
            loop {
                let notified = inbox.notify.notified();
                {
                    let buf = inbox.buf.lock().unwrap();
                    if !buf.is_empty() || inbox.writer_closed.load(Ordering::Acquire) {
                        return Ok(());
                    }
                }
                notified.await;
            }
        }
    }

    fn writable(&self) -> impl Future<Output = io::Result<()>> + Send {
        // The fake transport's outbox is unbounded (besides the per-call
        // chunk cap), so it is always immediately writable.
        async { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_delivers_bytes_written_on_one_end_to_the_other() {
        let (a, b) = DuplexTransport::pair();
        assert_eq!(a.try_write(b"hello").unwrap(), 5);

        b.readable().await.unwrap();
        let mut buf = [0u8; 16];
        let n = b.try_read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn write_cap_splits_large_writes() {
        let (a, _b) = DuplexTransport::pair();
        let a = a.with_write_cap(4);
        let n = a.try_write(b"0123456789").unwrap();
        assert_eq!(n, 4);
    }

    #[test]
    fn read_on_empty_inbox_is_would_block() {
        let (a, _b) = DuplexTransport::pair();
        let mut buf = [0u8; 4];
        let err = a.try_read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn closing_write_side_surfaces_as_eof_once_drained() {
        let (a, b) = DuplexTransport::pair();
        a.try_write(b"x").unwrap();
        a.close_write_side();

        let mut buf = [0u8; 4];
        assert_eq!(b.try_read(&mut buf).unwrap(), 1);
        assert_eq!(b.try_read(&mut buf).unwrap(), 0);
    }
}
