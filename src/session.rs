// ABOUTME: Public Session handle, builder, role/config types, and the shared state they act on
// ABOUTME: Session is a cheap-clone handle; the actor task is the sole owner of the live queue

use crate::callbacks::{OnPush, OnRequest};
use crate::encoding::{Encoder, EncodingRegistry};
use crate::error::{CloseReason, SessionError, SessionResult};
use crate::frame::Seq;
use crate::inflight::InflightTable;
use crate::transport::Transport;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tracing::{debug, warn};

/// Which side of the handshake this session plays. Clients send `Hello`
/// and requests/pushes; servers receive `Hello` and send responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Tunable knobs: a `ping_interval` (default 30s), a cap on the actor's
/// staging buffer, the read chunk size, and an optional shutdown grace
/// period. A `Default` impl plus chained `with_*` setters.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub ping_interval: Duration,
    pub outbuf_max: usize,
    pub read_chunk_size: usize,
    /// How long the shutdown terminator waits for a graceful `close_done`
    /// before forcing cleanup. Defaults to one `ping_interval`.
    pub shutdown_grace: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            outbuf_max: 65_536,
            read_chunk_size: 65_536,
            shutdown_grace: None,
        }
    }
}

impl SessionConfig {
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_outbuf_max(mut self, max: usize) -> Self {
        self.outbuf_max = max;
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = Some(grace);
        self
    }

    pub(crate) fn grace_period(&self) -> Duration {
        self.shutdown_grace.unwrap_or(self.ping_interval)
    }
}

/// One command sent from a [`Session`] handle to its actor task. Every
/// operation that mutates the `StreamHandler`'s outbound queue must cross
/// this channel, since the actor is the queue's sole owner.
pub(crate) enum Command<V> {
    SendRequest {
        payload: Bytes,
        respond: oneshot::Sender<SessionResult<Bytes>>,
    },
    SendPush {
        payload: Bytes,
    },
    SendResponse {
        seq: Seq,
        payload: Bytes,
    },
    SendPing {
        respond: oneshot::Sender<SessionResult<Bytes>>,
    },
}

/// State shared between the [`Session`] handle(s), the actor task, and the
/// shutdown terminator. All fields are safe to touch from any of them; the
/// actor remains the only task that owns the `StreamHandler` itself, which
/// is why queue mutations still have to go through `Command`.
pub(crate) struct Shared<V> {
    pub(crate) role: Role,
    pub(crate) config: SessionConfig,
    pub(crate) ready: watch::Sender<bool>,
    pub(crate) stop_requested: AtomicBool,
    pub(crate) stop_notify: Notify,
    pub(crate) terminator_spawned: AtomicBool,
    pub(crate) close_done: AtomicBool,
    pub(crate) close_done_notify: Notify,
    pub(crate) close_reason: Mutex<Option<CloseReason>>,
    pub(crate) inflight: Mutex<InflightTable>,
    pub(crate) registry: EncodingRegistry<V>,
    pub(crate) encoder: Mutex<Option<Arc<dyn Encoder<V>>>>,
    pub(crate) on_request: Option<Box<dyn OnRequest<V>>>,
    pub(crate) on_push: Option<Box<dyn OnPush<V>>>,
    pub(crate) cmd_tx: mpsc::UnboundedSender<Command<V>>,
    /// Count of live `Session` handles (distinct from the `Arc` strong
    /// count, which the actor task's own clone also holds). Reaching zero
    /// means the application let go of the session without an explicit
    /// `close`, so the actor should wind down on its own.
    pub(crate) handle_count: AtomicUsize,
}

impl<V> Shared<V> {
    pub(crate) fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub(crate) fn mark_ready(&self) {
        // `send` is a no-op (and returns Err without updating the stored
        // value) once every receiver has been dropped, which happens here:
        // `build()` doesn't keep its initial receiver alive. `send_replace`
        // updates the stored value unconditionally.
        self.ready.send_replace(true);
    }

    pub(crate) fn current_encoder(&self) -> Option<Arc<dyn Encoder<V>>> {
        self.encoder.lock().unwrap().clone()
    }

    /// Suspends until `ready` is set, either by a successful handshake or by
    /// `close` unblocking waiters with a now-certain failure.
    pub(crate) async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }
}

/// One established RPC conversation bound to one duplex byte stream. Cheap
/// to clone: every clone shares the same actor task, the way a
/// `yamux`/`h2` connection handle is shared between callers.
pub struct Session<V> {
    pub(crate) shared: Arc<Shared<V>>,
}

impl<V> Clone for Session<V> {
    fn clone(&self) -> Self {
        self.shared.handle_count.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<V: Send + Sync + 'static> Drop for Session<V> {
    fn drop(&mut self) {
        if self.shared.handle_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            crate::shutdown::initiate_close(&self.shared, CloseReason::Requested);
        }
    }
}

impl<V: Send + Sync + 'static> Session<V> {
    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn is_ready(&self) -> bool {
        self.shared.is_ready()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.shared.close_reason.lock().unwrap()
    }

    /// `send_request(value) → awaitable<Response>`. Client-only.
    pub async fn send_request(&self, value: V) -> SessionResult<V> {
        if self.shared.role != Role::Client {
            return Err(SessionError::ProgrammerError(
                "send_request is only valid for the client role",
            ));
        }
        self.shared.wait_ready().await;
        let encoder = self
            .shared
            .current_encoder()
            .ok_or_else(|| SessionError::ConnectionTerminated(self.effective_close_reason()))?;
        let payload = encoder.encode(&value)?;

        let (respond, rx) = oneshot::channel();
        self.shared
            .cmd_tx
            .send(Command::SendRequest { payload, respond })
            .map_err(|_| SessionError::ConnectionTerminated(self.effective_close_reason()))?;

        let bytes = rx
            .await
            .map_err(|_| SessionError::ConnectionTerminated(self.effective_close_reason()))??;
        encoder.decode(&bytes)
    }

    /// `send_push(value)`. Client-only; encoded symmetrically to requests.
    /// Suspends until the session is ready, same as `send_request`, since
    /// the encoder it needs doesn't exist before the handshake completes.
    pub async fn send_push(&self, value: V) -> SessionResult<()> {
        if self.shared.role != Role::Client {
            return Err(SessionError::ProgrammerError(
                "send_push is only valid for the client role",
            ));
        }
        self.shared.wait_ready().await;
        let encoder = self
            .shared
            .current_encoder()
            .ok_or_else(|| SessionError::ConnectionTerminated(self.effective_close_reason()))?;
        let payload = encoder.encode(&value)?;

        self.shared
            .cmd_tx
            .send(Command::SendPush { payload })
            .map_err(|_| SessionError::ConnectionTerminated(self.effective_close_reason()))
    }

    /// `send_response(seq, value)`. Server-only; `seq` must name an inbound
    /// request still awaiting a reply.
    pub fn send_response(&self, seq: Seq, value: V) -> SessionResult<()> {
        if self.shared.role != Role::Server {
            return Err(SessionError::ProgrammerError(
                "send_response is only valid for the server role",
            ));
        }
        {
            let mut inflight = self.shared.inflight.lock().unwrap();
            match inflight.take(crate::inflight::SeqSpace::Inbound, seq) {
                Some(crate::inflight::InflightEntry::Inbound) => {}
                Some(crate::inflight::InflightEntry::Outbound(_)) | None => {
                    return Err(SessionError::ProgrammerError(
                        "send_response: unknown sequence number",
                    ));
                }
            }
        }
        let encoder = self
            .shared
            .current_encoder()
            .ok_or(SessionError::NoEncoderAvailable)?;
        let payload = encoder.encode(&value)?;

        self.shared
            .cmd_tx
            .send(Command::SendResponse { seq, payload })
            .map_err(|_| SessionError::ConnectionTerminated(self.effective_close_reason()))
    }

    /// `send_ping() → awaitable<Pong>`, independent of the session's own
    /// internal ping loop.
    pub async fn send_ping(&self) -> SessionResult<()> {
        self.shared.wait_ready().await;
        let (respond, rx) = oneshot::channel();
        self.shared
            .cmd_tx
            .send(Command::SendPing { respond })
            .map_err(|_| SessionError::ConnectionTerminated(self.effective_close_reason()))?;
        rx.await
            .map_err(|_| SessionError::ConnectionTerminated(self.effective_close_reason()))??;
        Ok(())
    }

    /// Idempotent close. `block` awaits `close_done`.
    pub async fn close(&self, block: bool, reason: CloseReason) {
        crate::shutdown::initiate_close(&self.shared, reason);
        if block {
            while !self.shared.close_done.load(Ordering::Acquire) {
                self.shared.close_done_notify.notified().await;
            }
        }
    }

    fn effective_close_reason(&self) -> CloseReason {
        self.close_reason().unwrap_or(CloseReason::Requested)
    }
}

/// Builds a [`Session`] bound to an already-connected transport: collect
/// options, then `build()` produces the live handle and spawns its backing
/// task.
pub struct SessionBuilder<V> {
    role: Role,
    config: SessionConfig,
    registry: EncodingRegistry<V>,
    on_request: Option<Box<dyn OnRequest<V>>>,
    on_push: Option<Box<dyn OnPush<V>>>,
}

impl<V> SessionBuilder<V> {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            config: SessionConfig::default(),
            registry: EncodingRegistry::new(),
            on_request: None,
            on_push: None,
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a named encoder. Only has effect if called before the
    /// handshake completes; `build()` is the last chance.
    pub fn register_encoder(mut self, name: impl Into<String>, encoder: Arc<dyn Encoder<V>>) -> Self {
        self.registry.register(name, encoder);
        self
    }

    pub fn on_request(mut self, callback: impl OnRequest<V> + 'static) -> Self {
        self.on_request = Some(Box::new(callback));
        self
    }

    pub fn on_push(mut self, callback: impl OnPush<V> + 'static) -> Self {
        self.on_push = Some(Box::new(callback));
        self
    }
}

impl<V: Send + Sync + 'static> SessionBuilder<V> {
    /// Spawns the actor task and returns the live handle. `transport` must
    /// already be connected.
    pub fn build<T: Transport + 'static>(self, transport: T) -> Session<V> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ready_tx, _ready_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            role: self.role,
            config: self.config,
            ready: ready_tx,
            stop_requested: AtomicBool::new(false),
            stop_notify: Notify::new(),
            terminator_spawned: AtomicBool::new(false),
            close_done: AtomicBool::new(false),
            close_done_notify: Notify::new(),
            close_reason: Mutex::new(None),
            inflight: Mutex::new(InflightTable::new()),
            registry: self.registry,
            encoder: Mutex::new(None),
            on_request: self.on_request,
            on_push: self.on_push,
            cmd_tx,
            handle_count: AtomicUsize::new(1),
        });

        let actor = crate::actor::Actor::new(shared.clone(), transport, cmd_rx);
        tokio::spawn(async move {
            actor.run().await;
        });
        debug!(role = ?shared.role, "session actor spawned");

        Session { shared }
    }
}

pub(crate) fn warn_unhandled_goaway() {
    warn!("received GoAway; handling is reserved and this frame is ignored");
}
