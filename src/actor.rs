// ABOUTME: The combined I/O engine and ping loop run loop, one task per session
// ABOUTME: Single tokio::select! actor: drains the socket, feeds the stream handler, paces pings

use crate::error::{CloseReason, SessionResult};
use crate::frame::{Frame, Seq};
use crate::inflight::{InflightEntry, SeqSpace};
use crate::session::{Command, Role, Shared};
use crate::shutdown::{initiate_close, mark_close_done};
use crate::socket_watcher::SocketWatcher;
use crate::stream_handler::StreamHandler;
use crate::transport::Transport;
use bytes::{Bytes, BytesMut};
use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

pub(crate) struct Actor<V, T> {
    shared: Arc<Shared<V>>,
    watcher: SocketWatcher<T>,
    handler: StreamHandler,
    cmd_rx: mpsc::UnboundedReceiver<Command<V>>,
    staging: BytesMut,
    effective_ping_interval: Duration,
}

impl<V: Send + Sync + 'static, T: Transport> Actor<V, T> {
    pub(crate) fn new(shared: Arc<Shared<V>>, transport: T, cmd_rx: mpsc::UnboundedReceiver<Command<V>>) -> Self {
        let effective_ping_interval = shared.config.ping_interval;
        Self {
            watcher: SocketWatcher::new(transport),
            handler: StreamHandler::new(),
            cmd_rx,
            staging: BytesMut::new(),
            effective_ping_interval,
            shared,
        }
    }

    pub(crate) async fn run(mut self) {
        if self.shared.role == Role::Client {
            let names = self.shared.registry.names();
            self.handler
                .send_hello(self.effective_ping_interval.as_millis() as u32, names);
            self.resume_sending();
        }

        let read_chunk_size = self.shared.config.read_chunk_size;
        let mut read_buf = vec![0u8; read_chunk_size];
        let mut ping_deadline = Box::pin(tokio::time::sleep(self.effective_ping_interval));
        let mut liveness_ping: Option<(Seq, oneshot::Receiver<SessionResult<Bytes>>)> = None;

        loop {
            if self.should_stop() {
                break;
            }

            tokio::select! {
                biased;

                () = self.shared.stop_notify.notified() => {
                    continue;
                }

                maybe_cmd = self.cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => initiate_close(&self.shared, CloseReason::Requested),
                    }
                }

                res = self.watcher.wait_readable() => {
                    self.process_readable(res, &mut read_buf);
                }

                res = self.watcher.wait_writable(), if !self.staging.is_empty() => {
                    self.process_writable(res);
                }

                () = &mut ping_deadline => {
                    ping_deadline.as_mut().reset(tokio::time::Instant::now() + self.effective_ping_interval);
                    if self.shared.is_ready() && !self.shared.stop_requested.load(Ordering::Acquire) {
                        self.handle_ping_tick(&mut liveness_ping);
                    }
                }
            }
        }

        self.finalize();
    }

    fn should_stop(&self) -> bool {
        self.shared.stop_requested.load(Ordering::Acquire) && self.staging.is_empty() && self.handler.write_buffer_len() == 0
    }

    fn handle_command(&mut self, cmd: Command<V>) {
        match cmd {
            Command::SendRequest { payload, respond } => {
                let seq = self.handler.send_request(payload);
                self.shared
                    .inflight
                    .lock()
                    .unwrap()
                    .insert(SeqSpace::Outbound, seq, InflightEntry::Outbound(respond));
                self.resume_sending();
            }
            Command::SendPush { payload } => {
                self.handler.send_push(payload);
                self.resume_sending();
            }
            Command::SendResponse { seq, payload } => {
                self.handler.send_response(seq, payload);
                self.resume_sending();
            }
            Command::SendPing { respond } => {
                let seq = self.handler.send_ping();
                self.shared
                    .inflight
                    .lock()
                    .unwrap()
                    .insert(SeqSpace::Outbound, seq, InflightEntry::Outbound(respond));
                self.resume_sending();
            }
        }
    }

    fn process_readable(&mut self, ready: io::Result<()>, read_buf: &mut [u8]) {
        if let Err(e) = ready {
            warn!(error = %e, "socket readiness error, closing");
            initiate_close(&self.shared, CloseReason::SocketError);
            return;
        }

        match self.watcher.read_step(read_buf) {
            Ok(0) => {
                debug!("peer closed its write side");
                initiate_close(&self.shared, CloseReason::PeerEof);
            }
            Ok(n) => match self.handler.on_bytes(&read_buf[..n]) {
                Ok(events) => {
                    for event in events {
                        self.dispatch_event(event);
                    }
                    self.resume_sending();
                }
                Err(e) => {
                    warn!(error = %e, "frame decode error, closing");
                    initiate_close(&self.shared, CloseReason::SocketError);
                }
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                warn!(error = %e, "read error, closing");
                initiate_close(&self.shared, CloseReason::SocketError);
            }
        }
    }

    fn process_writable(&mut self, ready: io::Result<()>) {
        if let Err(e) = ready {
            warn!(error = %e, "socket readiness error, closing");
            initiate_close(&self.shared, CloseReason::SocketError);
            return;
        }
        if self.staging.is_empty() {
            return;
        }
        match self.watcher.write_step(&self.staging) {
            Ok(0) => {}
            Ok(n) => {
                let _ = self.staging.split_to(n);
                self.resume_sending();
            }
            Err(e) => {
                warn!(error = %e, "write error, closing");
                initiate_close(&self.shared, CloseReason::SocketError);
            }
        }
    }

    /// Move bytes from the handler's unbounded queue into the bounded
    /// staging buffer while there's room.
    fn resume_sending(&mut self) {
        let outbuf_max = self.shared.config.outbuf_max;
        while self.handler.write_buffer_len() > 0 && self.staging.len() < outbuf_max {
            let room = outbuf_max - self.staging.len();
            let chunk = self.handler.write_buffer_take(room);
            if chunk.is_empty() {
                break;
            }
            self.staging.extend_from_slice(&chunk);
        }
    }

    fn dispatch_event(&mut self, frame: Frame) {
        if !self.shared.is_ready() {
            self.dispatch_handshake_event(frame);
            return;
        }

        match frame {
            Frame::Request { seq, payload } => self.dispatch_request(seq, payload),
            Frame::Response { seq, payload } => {
                if let Some(InflightEntry::Outbound(tx)) =
                    self.shared.inflight.lock().unwrap().take(SeqSpace::Outbound, seq)
                {
                    let _ = tx.send(Ok(payload));
                } else {
                    trace!(seq, "response for unknown or already-resolved seq, dropped");
                }
            }
            Frame::Push { payload } => self.dispatch_push(payload),
            Frame::Ping { .. } => {
                // StreamHandler already queued the transparent pong.
            }
            Frame::Pong { seq } => {
                if let Some(InflightEntry::Outbound(tx)) =
                    self.shared.inflight.lock().unwrap().take(SeqSpace::Outbound, seq)
                {
                    let _ = tx.send(Ok(Bytes::new()));
                }
            }
            Frame::GoAway => crate::session::warn_unhandled_goaway(),
            Frame::Hello { .. } | Frame::SelectEncoding { .. } => {
                trace!("ignoring handshake frame received after ready");
            }
        }
    }

    fn dispatch_handshake_event(&mut self, frame: Frame) {
        match (self.shared.role, frame) {
            (Role::Server, Frame::Hello { ping_interval_ms, encodings }) => {
                self.effective_ping_interval = Duration::from_millis(ping_interval_ms as u64);
                match self.shared.registry.pick(&encodings) {
                    Some(name) => {
                        let encoder = self.shared.registry.get(&name).expect("pick returned a registered name");
                        *self.shared.encoder.lock().unwrap() = Some(encoder);
                        self.handler.send_select_encoding(name);
                        self.resume_sending();
                        self.shared.mark_ready();
                        debug!("encoding negotiated, session ready");
                    }
                    None => {
                        warn!("no mutual encoder, closing");
                        initiate_close(&self.shared, CloseReason::NoMutualEncoders);
                    }
                }
            }
            (Role::Client, Frame::SelectEncoding { name }) => match self.shared.registry.get(&name) {
                Some(encoder) => {
                    *self.shared.encoder.lock().unwrap() = Some(encoder);
                    self.shared.mark_ready();
                    debug!("encoding negotiated, session ready");
                }
                None => {
                    warn!(name, "peer selected an unregistered encoder, closing");
                    initiate_close(&self.shared, CloseReason::UnknownEncoder);
                }
            },
            (_, other) => {
                trace!(?other, "unexpected frame during handshake, ignored");
            }
        }
    }

    fn dispatch_request(&mut self, seq: Seq, payload: Bytes) {
        self.shared
            .inflight
            .lock()
            .unwrap()
            .insert(SeqSpace::Inbound, seq, InflightEntry::Inbound);

        let Some(encoder) = self.shared.current_encoder() else {
            return;
        };
        let Some(callback) = self.shared.on_request.as_ref() else {
            return;
        };
        let value = match encoder.decode(&payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to decode inbound request payload");
                self.shared.inflight.lock().unwrap().take(SeqSpace::Inbound, seq);
                return;
            }
        };

        if let Some(reply) = callback(value) {
            let still_open = matches!(
                self.shared.inflight.lock().unwrap().take(SeqSpace::Inbound, seq),
                Some(InflightEntry::Inbound)
            );
            if !still_open {
                return;
            }
            match encoder.encode(&reply) {
                Ok(bytes) => {
                    self.handler.send_response(seq, bytes);
                    self.resume_sending();
                }
                Err(e) => warn!(error = %e, "failed to encode response payload"),
            }
        }
    }

    fn dispatch_push(&mut self, payload: Bytes) {
        let Some(encoder) = self.shared.current_encoder() else {
            return;
        };
        let Some(callback) = self.shared.on_push.as_ref() else {
            return;
        };
        match encoder.decode(&payload) {
            Ok(value) => callback(value),
            Err(e) => warn!(error = %e, "failed to decode inbound push payload"),
        }
    }

    fn handle_ping_tick(&mut self, liveness_ping: &mut Option<(Seq, oneshot::Receiver<SessionResult<Bytes>>)>) {
        if let Some((seq, mut rx)) = liveness_ping.take() {
            match rx.try_recv() {
                Ok(_) => {}
                Err(oneshot::error::TryRecvError::Empty) => {
                    warn!(seq, "no pong within the ping interval, closing");
                    initiate_close(&self.shared, CloseReason::PingTimeout);
                    return;
                }
                Err(oneshot::error::TryRecvError::Closed) => {}
            }
        }

        let seq = self.handler.send_ping();
        let (tx, rx) = oneshot::channel();
        self.shared
            .inflight
            .lock()
            .unwrap()
            .insert(SeqSpace::Outbound, seq, InflightEntry::Outbound(tx));
        *liveness_ping = Some((seq, rx));
        self.resume_sending();
    }

    fn finalize(self) {
        let reason = self.shared.close_reason.lock().unwrap().unwrap_or(CloseReason::Requested);
        self.shared.inflight.lock().unwrap().drain_failing(reason);
        // self.watcher (and the transport it owns) is dropped here, releasing the socket.
        mark_close_done(&self.shared);
        debug!(?reason, "session actor finished");
    }
}
