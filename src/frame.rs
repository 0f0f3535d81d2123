// ABOUTME: Wire frame header and body encode/decode for the session protocol
// ABOUTME: Fixed header plus a kind-specific body, split between header parsing and per-kind bodies

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io::Cursor;
use thiserror::Error;

/// Maximum allowed frame size, guarding against memory exhaustion from a
/// corrupt or hostile peer.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// A 32-bit sequence number allocated by the `StreamHandler`, unique per
/// session per direction.
pub type Seq = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum FrameKind {
    Request = 1,
    Response = 2,
    Push = 3,
    Ping = 4,
    Pong = 5,
    Hello = 6,
    GoAway = 7,
    SelectEncoding = 8,
}

/// Fixed 12-byte frame header, common to every frame kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_length: u32,
    pub kind: FrameKind,
    pub seq: Seq,
}

impl FrameHeader {
    pub const SIZE: usize = 12;

    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, FrameError> {
        if buf.remaining() < Self::SIZE {
            return Err(FrameError::Incomplete);
        }
        let frame_length = buf.get_u32();
        let kind_raw = buf.get_u32();
        let kind = FrameKind::try_from(kind_raw).map_err(|_| FrameError::InvalidKind(kind_raw))?;
        let seq = buf.get_u32();

        if frame_length < Self::SIZE as u32 {
            return Err(FrameError::InvalidLength(frame_length));
        }
        if frame_length > MAX_FRAME_SIZE {
            return Err(FrameError::InvalidLength(frame_length));
        }

        Ok(FrameHeader {
            frame_length,
            kind,
            seq,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.frame_length);
        buf.put_u32(self.kind.into());
        buf.put_u32(self.seq);
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("not enough data buffered yet")]
    Incomplete,
    #[error("unknown frame kind {0}")]
    InvalidKind(u32),
    #[error("invalid frame length {0}")]
    InvalidLength(u32),
    #[error("malformed frame body: {0}")]
    Malformed(&'static str),
    #[error("utf8 decode error in frame body")]
    Utf8,
}

impl From<std::string::FromUtf8Error> for FrameError {
    fn from(_: std::string::FromUtf8Error) -> Self {
        FrameError::Utf8
    }
}

/// A single decoded protocol unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Request { seq: Seq, payload: Bytes },
    Response { seq: Seq, payload: Bytes },
    Push { payload: Bytes },
    Ping { seq: Seq },
    Pong { seq: Seq },
    Hello { ping_interval_ms: u32, encodings: Vec<String> },
    GoAway,
    SelectEncoding { name: String },
}

impl Frame {
    /// Check whether `buf` holds one complete frame, without allocating. On
    /// success, the cursor position is left at the start of the frame (the
    /// caller re-reads from position 0 via `parse`).
    pub fn check(buf: &mut Cursor<&[u8]>) -> Result<usize, FrameError> {
        let start = buf.position();
        let header = FrameHeader::decode(buf)?;
        let total = header.frame_length as usize;
        if (buf.get_ref().len() as u64) < start + total as u64 {
            return Err(FrameError::Incomplete);
        }
        Ok(total)
    }

    /// Parse one complete frame from the front of `buf`. Caller must have
    /// already confirmed enough bytes are present via `check`.
    pub fn parse(buf: &mut Cursor<&[u8]>) -> Result<Self, FrameError> {
        let header = FrameHeader::decode(buf)?;
        let body_len = header.frame_length as usize - FrameHeader::SIZE;
        if buf.remaining() < body_len {
            return Err(FrameError::Incomplete);
        }
        let body = buf.copy_to_bytes(body_len);
        let mut body = Cursor::new(&body[..]);

        Ok(match header.kind {
            FrameKind::Request => Frame::Request {
                seq: header.seq,
                payload: copy_remaining(&mut body),
            },
            FrameKind::Response => Frame::Response {
                seq: header.seq,
                payload: copy_remaining(&mut body),
            },
            FrameKind::Push => Frame::Push {
                payload: copy_remaining(&mut body),
            },
            FrameKind::Ping => Frame::Ping { seq: header.seq },
            FrameKind::Pong => Frame::Pong { seq: header.seq },
            FrameKind::GoAway => Frame::GoAway,
            FrameKind::Hello => {
                if body.remaining() < 4 {
                    return Err(FrameError::Malformed("hello: truncated interval"));
                }
                let ping_interval_ms = body.get_u32();
                if body.remaining() < 2 {
                    return Err(FrameError::Malformed("hello: truncated count"));
                }
                let count = body.get_u16();
                let mut encodings = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    encodings.push(read_string(&mut body)?);
                }
                Frame::Hello {
                    ping_interval_ms,
                    encodings,
                }
            }
            FrameKind::SelectEncoding => {
                let name = read_string(&mut body)?;
                Frame::SelectEncoding { name }
            }
        })
    }

    /// Encode this frame to wire bytes, filling in `frame_length` once the
    /// body is known.
    pub fn to_bytes(&self) -> Bytes {
        let mut body = BytesMut::new();
        let (kind, seq) = match self {
            Frame::Request { seq, payload } => {
                body.put_slice(payload);
                (FrameKind::Request, *seq)
            }
            Frame::Response { seq, payload } => {
                body.put_slice(payload);
                (FrameKind::Response, *seq)
            }
            Frame::Push { payload } => {
                body.put_slice(payload);
                (FrameKind::Push, 0)
            }
            Frame::Ping { seq } => (FrameKind::Ping, *seq),
            Frame::Pong { seq } => (FrameKind::Pong, *seq),
            Frame::GoAway => (FrameKind::GoAway, 0),
            Frame::Hello {
                ping_interval_ms,
                encodings,
            } => {
                body.put_u32(*ping_interval_ms);
                body.put_u16(encodings.len() as u16);
                for name in encodings {
                    write_string(&mut body, name);
                }
                (FrameKind::Hello, 0)
            }
            Frame::SelectEncoding { name } => {
                write_string(&mut body, name);
                (FrameKind::SelectEncoding, 0)
            }
        };

        let mut out = BytesMut::with_capacity(FrameHeader::SIZE + body.len());
        let header = FrameHeader {
            frame_length: (FrameHeader::SIZE + body.len()) as u32,
            kind,
            seq,
        };
        header.encode(&mut out);
        out.put_slice(&body);
        out.freeze()
    }
}

fn copy_remaining(buf: &mut Cursor<&[u8]>) -> Bytes {
    let rest = buf.remaining();
    buf.copy_to_bytes(rest)
}

fn read_string(buf: &mut Cursor<&[u8]>) -> Result<String, FrameError> {
    if buf.remaining() < 2 {
        return Err(FrameError::Malformed("truncated string length"));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(FrameError::Malformed("truncated string body"));
    }
    let bytes = buf.copy_to_bytes(len);
    Ok(String::from_utf8(bytes.to_vec())?)
}

fn write_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}
