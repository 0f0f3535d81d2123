// ABOUTME: Thin non-blocking read/write wrapper around a Transport
// ABOUTME: Owns the sticky write_blocked flag and the readable/writable waits the actor selects on

use crate::transport::Transport;
use std::io;

/// Wraps a [`Transport`] with a non-blocking recv/send contract: reads and
/// writes never block, and a write that could not make progress sets a
/// sticky `write_blocked` flag cleared only by a subsequent successful
/// write.
pub struct SocketWatcher<T> {
    transport: T,
    write_blocked: bool,
}

impl<T: Transport> SocketWatcher<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            write_blocked: false,
        }
    }

    /// Non-blocking read. `Ok(0)` means the peer closed its write side.
    pub fn read_step(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.transport.try_read(buf)
    }

    /// Non-blocking write of as much of `buf` as the socket will currently
    /// accept. A would-block condition (whether signaled by `Ok(0)` or
    /// `Err(WouldBlock)`) is reported as `Ok(0)` and sets `write_blocked`.
    pub fn write_step(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.transport.try_write(buf) {
            Ok(0) => {
                self.write_blocked = true;
                Ok(0)
            }
            Ok(n) => {
                self.write_blocked = false;
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.write_blocked = true;
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    pub fn write_blocked(&self) -> bool {
        self.write_blocked
    }

    pub async fn wait_readable(&self) -> io::Result<()> {
        self.transport.readable().await
    }

    pub async fn wait_writable(&self) -> io::Result<()> {
        self.transport.writable().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DuplexTransport;

    #[test]
    fn write_step_reports_full_write_and_clears_blocked() {
        let (a, _b) = DuplexTransport::pair();
        let mut watcher = SocketWatcher::new(a);
        let n = watcher.write_step(b"hello").unwrap();
        assert_eq!(n, 5);
        assert!(!watcher.write_blocked());
    }

    #[test]
    fn write_step_sets_sticky_blocked_flag_on_zero_write() {
        let (a, _b) = DuplexTransport::pair();
        let a = a.with_write_cap(0);
        let mut watcher = SocketWatcher::new(a);
        let n = watcher.write_step(b"hello").unwrap();
        assert_eq!(n, 0);
        assert!(watcher.write_blocked());
    }

    #[test]
    fn read_step_surfaces_would_block_on_empty_inbox() {
        let (a, _b) = DuplexTransport::pair();
        let watcher = SocketWatcher::new(a);
        let mut buf = [0u8; 8];
        let err = watcher.read_step(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[tokio::test]
    async fn wait_readable_resolves_once_peer_writes() {
        let (a, b) = DuplexTransport::pair();
        let watcher_a = SocketWatcher::new(a);
        b.try_write(b"hi").unwrap();
        watcher_a.wait_readable().await.unwrap();
        let mut buf = [0u8; 8];
        let n = watcher_a.read_step(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi");
    }
}
