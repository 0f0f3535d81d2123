// ABOUTME: Sequence-keyed table of outstanding exchanges, drained on shutdown
// ABOUTME: Grounded on the seq-keyed pending-request maps in Masorubka1-iscsi-client-rs's client.rs

use crate::error::{CloseReason, SessionError};
use crate::frame::Seq;
use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// A single inflight entry: either an outbound call this session is waiting
/// on a response for, or an inbound request currently being serviced.
///
/// Modeled as one tagged enum rather than two maps so "a seq is either
/// outbound-pending or inbound-awaiting-response, never both" holds
/// structurally.
pub enum InflightEntry {
    /// An outbound `send_request`/`send_ping` awaiting its `Response`/`Pong`.
    Outbound(oneshot::Sender<Result<Bytes, SessionError>>),
    /// An inbound `Request` retained so `send_response(seq, ...)` can verify
    /// the seq names an open exchange.
    Inbound,
}

/// Which side allocated a sequence number. A session's own `StreamHandler`
/// allocates `Outbound` seqs for its own `send_request`/`send_ping` calls;
/// `Inbound` seqs are copied verbatim off the wire from a peer-sent
/// `Request`, allocated by the *peer's* independent counter. Both counters
/// start at 1, so the same numeric seq can be in flight in both directions
/// at once - this tag is what keeps them from colliding in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeqSpace {
    Outbound,
    Inbound,
}

/// Keyed by `(SeqSpace, Seq)` rather than bare `Seq`, since outbound and
/// inbound sequence numbers are allocated by two independent counters (this
/// session's and the peer's) and can legitimately collide numerically.
#[derive(Default)]
pub struct InflightTable {
    entries: HashMap<(SeqSpace, Seq), InflightEntry>,
}

impl InflightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Precondition: `(space, seq)` is absent. Panics in debug builds if
    /// violated, since a collision within one space means the allocator
    /// that owns it is broken, not a condition calling code can recover
    /// from.
    pub fn insert(&mut self, space: SeqSpace, seq: Seq, entry: InflightEntry) {
        debug_assert!(
            !self.entries.contains_key(&(space, seq)),
            "sequence number {seq} already inflight in {space:?}"
        );
        self.entries.insert((space, seq), entry);
    }

    pub fn take(&mut self, space: SeqSpace, seq: Seq) -> Option<InflightEntry> {
        self.entries.remove(&(space, seq))
    }

    pub fn contains(&self, space: SeqSpace, seq: Seq) -> bool {
        self.entries.contains_key(&(space, seq))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry, failing outbound waiters with `err`. Order is
    /// unspecified — callers must not depend on it.
    pub fn drain_failing(&mut self, reason: CloseReason) {
        for (_, entry) in self.entries.drain() {
            if let InflightEntry::Outbound(tx) = entry {
                let _ = tx.send(Err(SessionError::ConnectionTerminated(reason)));
            }
        }
    }
}
