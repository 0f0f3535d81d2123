// ABOUTME: Byte<->frame codec and outbound queue shared by the I/O engine on both sides
// ABOUTME: Feeds received bytes into decoded events and stages outbound frames for the I/O engine

use crate::frame::{Frame, FrameError, Seq};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use std::io::Cursor;

/// One decoded protocol event, as produced by [`StreamHandler::on_bytes`].
pub type Event = Frame;

/// Byte <-> frame codec plus the unbounded outbound queue. `Ping`/`Pong`
/// acknowledgement is transparent: `on_bytes` never needs to synthesize a
/// `Pong`, the peer's own `StreamHandler` does that on its side before any
/// bytes reach us.
#[derive(Debug, Default)]
pub struct StreamHandler {
    read_buf: BytesMut,
    write_queue: VecDeque<Bytes>,
    write_queue_len: usize,
    next_seq: Seq,
}

impl StreamHandler {
    pub fn new() -> Self {
        Self {
            read_buf: BytesMut::with_capacity(4 * 1024),
            write_queue: VecDeque::new(),
            write_queue_len: 0,
            next_seq: 1,
        }
    }

    /// Feed a chunk of received bytes, returning every frame that became
    /// decodable. Partial frames remain buffered for the next call.
    pub fn on_bytes(&mut self, data: &[u8]) -> Result<Vec<Event>, FrameError> {
        self.read_buf.extend_from_slice(data);

        let mut events = Vec::new();
        loop {
            let mut cursor = Cursor::new(&self.read_buf[..]);
            match Frame::check(&mut cursor) {
                Ok(len) => {
                    cursor.set_position(0);
                    let frame = Frame::parse(&mut cursor)?;
                    self.read_buf.advance(len);
                    if let Frame::Ping { seq } = frame {
                        self.send_pong(seq);
                    }
                    events.push(frame);
                }
                Err(FrameError::Incomplete) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(events)
    }

    fn allocate_seq(&mut self) -> Seq {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1).max(1);
        seq
    }

    fn enqueue(&mut self, frame: Frame) {
        let bytes = frame.to_bytes();
        self.write_queue_len += bytes.len();
        self.write_queue.push_back(bytes);
    }

    pub fn send_request(&mut self, payload: Bytes) -> Seq {
        let seq = self.allocate_seq();
        self.enqueue(Frame::Request { seq, payload });
        seq
    }

    pub fn send_push(&mut self, payload: Bytes) {
        self.enqueue(Frame::Push { payload });
    }

    pub fn send_response(&mut self, seq: Seq, payload: Bytes) {
        self.enqueue(Frame::Response { seq, payload });
    }

    pub fn send_ping(&mut self) -> Seq {
        let seq = self.allocate_seq();
        self.enqueue(Frame::Ping { seq });
        seq
    }

    pub fn send_pong(&mut self, seq: Seq) {
        self.enqueue(Frame::Pong { seq });
    }

    pub fn send_hello(&mut self, ping_interval_ms: u32, encodings: Vec<String>) {
        self.enqueue(Frame::Hello {
            ping_interval_ms,
            encodings,
        });
    }

    pub fn send_select_encoding(&mut self, name: String) {
        self.enqueue(Frame::SelectEncoding { name });
    }

    pub fn send_goaway(&mut self) {
        self.enqueue(Frame::GoAway);
    }

    /// Bytes currently queued, not yet handed to the staging buffer.
    pub fn write_buffer_len(&self) -> usize {
        self.write_queue_len
    }

    /// Drain up to `n` bytes of wire-format output from the front of the
    /// queue. May return fewer than `n` bytes if the queue holds less.
    pub fn write_buffer_take(&mut self, n: usize) -> Bytes {
        let mut taken = BytesMut::with_capacity(n.min(self.write_queue_len));
        while taken.len() < n {
            let Some(front) = self.write_queue.front_mut() else {
                break;
            };
            let remaining_budget = n - taken.len();
            if front.len() <= remaining_budget {
                let chunk = self.write_queue.pop_front().unwrap();
                self.write_queue_len -= chunk.len();
                taken.extend_from_slice(&chunk);
            } else {
                let chunk = front.split_to(remaining_budget);
                self.write_queue_len -= chunk.len();
                taken.extend_from_slice(&chunk);
            }
        }
        taken.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_through_queue_and_parser() {
        let mut writer = StreamHandler::new();
        let seq = writer.send_request(Bytes::from_static(b"ping"));
        let bytes = writer.write_buffer_take(writer.write_buffer_len());

        let mut reader = StreamHandler::new();
        let events = reader.on_bytes(&bytes).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Frame::Request { seq: got, payload } => {
                assert_eq!(*got, seq);
                assert_eq!(&payload[..], b"ping");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn write_buffer_take_respects_budget_across_chunks() {
        let mut handler = StreamHandler::new();
        handler.send_push(Bytes::from_static(b"0123456789"));
        handler.send_push(Bytes::from_static(b"abcdefghij"));

        let first = handler.write_buffer_take(5);
        assert_eq!(first.len(), 5);

        // Drain everything else and make sure nothing is lost or duplicated.
        let mut all = BytesMut::new();
        all.extend_from_slice(&first);
        loop {
            let chunk = handler.write_buffer_take(7);
            if chunk.is_empty() {
                break;
            }
            all.extend_from_slice(&chunk);
        }

        let mut fresh = StreamHandler::new();
        fresh.send_push(Bytes::from_static(b"0123456789"));
        fresh.send_push(Bytes::from_static(b"abcdefghij"));
        let expected = fresh.write_buffer_take(fresh.write_buffer_len());
        assert_eq!(&all[..], &expected[..]);
    }

    #[test]
    fn ping_is_acknowledged_with_a_transparent_pong() {
        let mut writer = StreamHandler::new();
        writer.send_ping();
        let bytes = writer.write_buffer_take(writer.write_buffer_len());

        let mut reader = StreamHandler::new();
        let events = reader.on_bytes(&bytes).unwrap();
        assert!(matches!(events[0], Frame::Ping { .. }));
        assert!(reader.write_buffer_len() > 0, "pong should be queued automatically");

        let pong_bytes = reader.write_buffer_take(reader.write_buffer_len());
        let mut third = StreamHandler::new();
        let events = third.on_bytes(&pong_bytes).unwrap();
        assert!(matches!(events[0], Frame::Pong { .. }));
    }

    #[test]
    fn sequence_numbers_are_unique_and_nonzero() {
        let mut handler = StreamHandler::new();
        let a = handler.send_request(Bytes::new());
        let b = handler.send_request(Bytes::new());
        assert_ne!(a, b);
        assert_ne!(a, 0);
        assert_ne!(b, 0);
    }
}
