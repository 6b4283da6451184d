//! Connection ownership: one task per socket, strict request serialisation,
//! keep-alive policy and graceful drain.
//!
//! The manager owns every accepted socket. Each socket gets exactly one
//! handler looping over [`RequestHandler::handle_one`], so requests on a
//! connection are served strictly in order and a socket is never written
//! by two handlers at once. The active counter is the exact number of
//! sockets currently owned.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::handler::{HandlerContext, RequestHandler, RunOutcome};
use crate::stream::ClientStream;

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    ctx: Arc<HandlerContext>,
    active: AtomicUsize,
    closing: CancellationToken,
    tasks: TaskTracker,
    slot_freed: Notify,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                ctx,
                active: AtomicUsize::new(0),
                closing: CancellationToken::new(),
                tasks: TaskTracker::new(),
                slot_freed: Notify::new(),
            }),
        }
    }

    /// Take ownership of an accepted socket and start serving it.
    /// Rejected (and the socket dropped) once the manager is closing.
    pub fn add(&self, stream: ClientStream) -> bool {
        if self.inner.closing.is_cancelled() {
            tracing::debug!("rejecting connection, manager is closing");
            return false;
        }

        let peer = stream.peer_addr().ok();
        self.inner.active.fetch_add(1, Ordering::SeqCst);

        let inner = self.inner.clone();
        let span = tracing::info_span!("connection", peer = ?peer, secure = stream.is_secure());
        self.inner
            .tasks
            .spawn(run_connection(inner, stream).instrument(span));
        true
    }

    /// Exact number of sockets currently owned by the manager.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.inner.closing.is_cancelled()
    }

    /// Park until the open-connection count drops below `cap` (or the
    /// manager starts closing).
    pub async fn wait_below(&self, cap: usize) {
        loop {
            // Register before the check so a slot freed in between cannot
            // be missed.
            let mut freed = std::pin::pin!(self.inner.slot_freed.notified());
            freed.as_mut().enable();
            if self.open_connections() < cap || self.is_closing() {
                return;
            }
            freed.await;
        }
    }

    /// Close every owned socket and await task drain, bounded by
    /// `drain_bound` (zero waits indefinitely). Idempotent; `add` rejects
    /// from the first call on.
    pub async fn close(&self, drain_bound: Duration) {
        self.inner.closing.cancel();
        self.inner.tasks.close();

        let drained = if drain_bound.is_zero() {
            self.inner.tasks.wait().await;
            true
        } else {
            tokio::time::timeout(drain_bound, self.inner.tasks.wait())
                .await
                .is_ok()
        };
        if !drained {
            tracing::warn!(
                remaining = self.open_connections(),
                "connection drain exceeded the shutdown bound"
            );
        }
        // Release any acceptor parked on capacity.
        self.inner.slot_freed.notify_waiters();
    }
}

async fn run_connection(inner: Arc<ManagerInner>, mut stream: ClientStream) {
    tracing::debug!("connection opened");
    let mut handler = RequestHandler::new(inner.ctx.clone());

    loop {
        tokio::select! {
            () = inner.closing.cancelled() => {
                tracing::debug!("connection cancelled by shutdown");
                break;
            }
            outcome = handler.handle_one(&mut stream) => match outcome {
                RunOutcome::Success => {}
                RunOutcome::IdleTimeout => {
                    tracing::trace!("client idle, keeping connection");
                }
                RunOutcome::Fault(err) => {
                    tracing::debug!(error = %err, "connection finished");
                    break;
                }
            }
        }
    }

    let _ = stream.shutdown().await;
    inner.active.fetch_sub(1, Ordering::SeqCst);
    inner.slot_freed.notify_waiters();
    tracing::debug!("connection closed");
}
