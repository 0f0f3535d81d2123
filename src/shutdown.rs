// ABOUTME: §4.H shutdown path: idempotent close plus the grace-period terminator backstop
// ABOUTME: The terminator only forces cleanup if the actor fails to self-report close_done in time

use crate::error::CloseReason;
use crate::session::Shared;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// Sets `stop`/records the close reason and, the first time this is called
/// for a given session, spawns the terminator task. Safe to call from the
/// `Session` handle, from within the actor (ping timeout, peer EOF, fatal
/// socket error), or from the encoding negotiator.
pub(crate) fn initiate_close<V: Send + Sync + 'static>(shared: &Arc<Shared<V>>, reason: CloseReason) {
    {
        let mut slot = shared.close_reason.lock().unwrap();
        if slot.is_none() {
            *slot = Some(reason);
        }
    }

    shared.stop_requested.store(true, Ordering::Release);
    shared.mark_ready();
    shared.stop_notify.notify_waiters();

    if shared
        .terminator_spawned
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        let shared = shared.clone();
        tokio::spawn(async move {
            run_terminator(shared).await;
        });
    }
}

/// Waits up to one grace period for the actor to finish its own graceful
/// teardown (draining inflight, dropping the transport, setting
/// `close_done`). If that window elapses first, forces the inflight table
/// empty and signals `close_done` itself so no caller of `close(block=true)`
/// or `send_request` hangs forever. The actor is the sole owner of the
/// transport, so "closing the socket" here means ensuring outstanding
/// callers unblock, not literally releasing the fd a second time.
async fn run_terminator<V: Send + Sync + 'static>(shared: Arc<Shared<V>>) {
    let grace = shared.config.grace_period();

    let already_done = tokio::time::timeout(grace, wait_close_done(&shared))
        .await
        .is_ok();

    if already_done {
        debug!("shutdown terminator observed graceful close_done");
        return;
    }

    warn!(?grace, "actor did not self-report close_done in time, forcing cleanup");
    let reason = shared.close_reason.lock().unwrap().unwrap_or(CloseReason::Requested);
    shared.inflight.lock().unwrap().drain_failing(reason);
    mark_close_done(&shared);
}

async fn wait_close_done<V>(shared: &Arc<Shared<V>>) {
    while !shared.close_done.load(Ordering::Acquire) {
        shared.close_done_notify.notified().await;
    }
}

pub(crate) fn mark_close_done<V>(shared: &Arc<Shared<V>>) {
    shared.close_done.store(true, Ordering::Release);
    shared.close_done_notify.notify_waiters();
}
