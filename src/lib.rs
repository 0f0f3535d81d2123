//! A bidirectional, framed RPC session over a single duplex byte stream.
//!
//! [`Session`] multiplexes four interaction patterns onto one connection:
//! request/response, one-way push, liveness ping/pong, and a short
//! encoding-negotiation handshake run once at the start of the connection.
//! The session owns a non-blocking [`Transport`], a [`StreamHandler`] that
//! turns bytes into frames, an [`InflightTable`] correlating replies to
//! their requests, and an [`EncodingRegistry`] that picks a mutual payload
//! encoder with the peer.

mod actor;
pub mod callbacks;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod inflight;
pub mod session;
mod shutdown;
pub mod socket_watcher;
pub mod stream_handler;
pub mod transport;

#[cfg(test)]
mod tests;

pub use callbacks::{OnPush, OnRequest};
pub use encoding::{Encoder, EncodingRegistry, IdentityEncoder, JsonEncoder, RmpEncoder};
pub use error::{CloseReason, SessionError, SessionResult};
pub use frame::{Frame, FrameKind, Seq};
pub use inflight::{InflightEntry, InflightTable};
pub use session::{Role, Session, SessionBuilder, SessionConfig};
pub use transport::{DuplexTransport, Transport};

/// Boxed error type for application code that doesn't want to match on
/// [`SessionError`]'s variants.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type built on the boxed [`Error`].
///
/// # Examples
///
/// ```rust,no_run
/// use duplex_session::{Role, Session, SessionBuilder, IdentityEncoder};
/// use std::sync::Arc;
/// use tokio::net::TcpStream;
///
/// # async fn run() -> duplex_session::Result<()> {
/// let socket = TcpStream::connect("127.0.0.1:9000").await?;
/// let session: Session<bytes::Bytes> = SessionBuilder::new(Role::Client)
///     .register_encoder("identity", Arc::new(IdentityEncoder))
///     .build(socket);
///
/// let reply = session.send_request(bytes::Bytes::from_static(b"ping")).await?;
/// println!("got {reply:?}");
/// # Ok(())
/// # }
/// ```
pub type Result<T> = std::result::Result<T, Error>;
