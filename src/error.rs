// ABOUTME: Session error types covering protocol, role, and connection-lifecycle failures
// ABOUTME: Provides structured error reporting with automatic conversion from I/O errors

use std::io;
use thiserror::Error;

/// The reason a session transitioned to `Closing`/`Closed`.
///
/// Wire-stable integer codes. Unknown codes must be tolerated by callers, so
/// this enum carries an explicit `Other` variant rather than failing to
/// construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// No pong arrived before the next ping interval elapsed.
    PingTimeout,
    /// The peer selected an encoder name this session never registered.
    UnknownEncoder,
    /// Neither side advertised a commonly registered encoder.
    NoMutualEncoders,
    /// `close()` was called explicitly by the application.
    Requested,
    /// The peer closed its end of the stream (zero-byte read).
    PeerEof,
    /// A socket-level error other than a clean EOF.
    SocketError,
    /// Reserved for forward compatibility; carries the raw wire code.
    Other(u32),
}

impl CloseReason {
    /// The wire-stable integer code for this reason.
    pub fn code(self) -> u32 {
        match self {
            CloseReason::PingTimeout => 1,
            CloseReason::UnknownEncoder => 2,
            CloseReason::NoMutualEncoders => 3,
            CloseReason::Requested => 4,
            CloseReason::PeerEof => 5,
            CloseReason::SocketError => 6,
            CloseReason::Other(code) => code,
        }
    }
}

/// Comprehensive error type for session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// I/O error during network operations (connect, read, write).
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),

    /// A `send_*` call was attempted before the encoding handshake completed,
    /// or after the encoder was cleared at shutdown.
    #[error("no encoder available yet")]
    NoEncoderAvailable,

    /// A role violation: a client tried to emit a `Response`, or a server
    /// tried to emit a `Request`/`Push`, or a response named an unknown seq.
    ///
    /// Raised synchronously and never placed on the wire.
    #[error("programmer error: {0}")]
    ProgrammerError(&'static str),

    /// The payload could not be encoded or decoded by the negotiated encoder.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The connection was torn down while this call was outstanding.
    #[error("connection terminated: {0:?}")]
    ConnectionTerminated(CloseReason),

    /// A pong did not arrive before the next ping interval elapsed.
    #[error("ping timed out")]
    PingTimeout,
}

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
