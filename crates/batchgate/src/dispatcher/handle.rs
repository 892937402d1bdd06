use super::{
    DispatchStats, DispatcherConfig, Lifecycle, lifecycle::LifecycleState,
    submission::Submission, worker::DispatchLoop,
};
use crate::{Acceptor, Batch, Error, Result};
use core::time::Duration;
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::{sync::mpsc, time::timeout};
use tokio_util::sync::CancellationToken;

/// Handle to a running dispatcher.
///
/// Cloning is cheap and every clone refers to the same dispatch loop. The
/// loop keeps running until the shutdown token passed to
/// [`spawn`](Self::spawn) is cancelled or every handle is dropped.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Shared>,
}

struct Shared {
    queue: mpsc::Sender<Submission>,
    shutdown: CancellationToken,
    done: CancellationToken,
    lifecycle: Arc<LifecycleState>,
    stats: Arc<DispatchStats>,
    next_submission: AtomicU64,
}

impl Dispatcher {
    /// Reads the acceptor's limits, spawns the dispatch loop on the current
    /// Tokio runtime and returns a handle to it.
    ///
    /// `shutdown` is the dispatcher-wide cancellation scope: cancelling it
    /// (directly or through [`terminate`](Self::terminate)) refuses new
    /// submissions and lets the loop drain what was already queued.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn<A: Acceptor>(
        acceptor: A,
        shutdown: CancellationToken,
        config: DispatcherConfig,
    ) -> Self {
        // A single slot: a submission is either being chunked, waiting in
        // the slot, or still with its caller.
        let (tx, rx) = mpsc::channel(1);
        let done = CancellationToken::new();
        let lifecycle = Arc::new(LifecycleState::new());
        let stats = Arc::new(DispatchStats::default());

        let worker = DispatchLoop::new(
            acceptor,
            rx,
            shutdown.clone(),
            config,
            Arc::clone(&lifecycle),
            Arc::clone(&stats),
            done.clone().drop_guard(),
        );
        tokio::spawn(worker.run());

        Self {
            inner: Arc::new(Shared {
                queue: tx,
                shutdown,
                done,
                lifecycle,
                stats,
                next_submission: AtomicU64::new(0),
            }),
        }
    }

    /// Hands `batch` to the dispatch loop.
    ///
    /// Waits only for the handoff slot, not for delivery to the acceptor.
    /// Once this returns `Ok`, the batch is chunked and delivered in order
    /// unless `cancel` fires first, in which case the undelivered remainder
    /// is silently abandoned.
    ///
    /// # Errors
    ///
    /// - [`Error::Terminated`] if the dispatcher is shut down before or while
    ///   waiting for the slot.
    /// - [`Error::Cancelled`] if `cancel` fires before the handoff completes.
    pub async fn send(&self, cancel: CancellationToken, batch: Batch) -> Result<()> {
        let shared = &self.inner;

        if shared.shutdown.is_cancelled() {
            return Err(Error::Terminated);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let submission = Submission {
            id: shared.next_submission.fetch_add(1, Ordering::Relaxed),
            batch,
            cancel: cancel.clone(),
        };

        tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => Err(Error::Terminated),
            () = cancel.cancelled() => Err(Error::Cancelled),
            sent = shared.queue.send(submission) => {
                sent.map_err(|_| Error::Terminated)?;
                shared.stats.record_received();
                Ok(())
            }
        }
    }

    /// Cancels the dispatcher-wide scope. Idempotent.
    pub fn terminate(&self) {
        self.inner.shutdown.cancel();
    }

    /// `true` once new submissions are refused.
    pub fn is_terminated(&self) -> bool {
        self.inner.shutdown.is_cancelled() || self.inner.done.is_cancelled()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        if self.is_terminated() {
            Lifecycle::Terminated
        } else {
            self.inner.lifecycle.load()
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.inner.stats
    }

    /// Resolves once the dispatch loop has drained and exited.
    pub async fn closed(&self) {
        self.inner.done.cancelled().await;
    }

    /// Terminates the dispatcher and waits up to `grace` for queued work to
    /// drain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimeout`] if the loop is still running when
    /// `grace` expires. The loop keeps draining in the background.
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        self.terminate();

        #[cfg(feature = "tracing")]
        tracing::info!("Waiting up to {grace:?} for the dispatch loop to drain");

        timeout(grace, self.closed())
            .await
            .map_err(|_| Error::ShutdownTimeout(grace))
    }

    /// Whether two handles refer to the same dispatcher.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
