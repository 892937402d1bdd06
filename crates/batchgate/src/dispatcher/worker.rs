use super::{
    BlockedPolicy, DispatchStats, DispatcherConfig, Lifecycle, lifecycle::LifecycleState,
    submission::Submission,
};
use crate::{Acceptor, Item, Limits};
use std::sync::Arc;
use tokio::{sync::mpsc, time::sleep};
use tokio_util::sync::{CancellationToken, DropGuard};

/// The single task that drives an [`Acceptor`].
///
/// It owns the acceptor, the current [`Limits`] and the receive end of the
/// submission queue. Nothing else touches them, so no locking is needed and
/// at most one chunk is ever in flight.
pub(crate) struct DispatchLoop<A> {
    acceptor: A,
    limits: Limits,
    queue: mpsc::Receiver<Submission>,
    shutdown: CancellationToken,
    config: DispatcherConfig,
    lifecycle: Arc<LifecycleState>,
    stats: Arc<DispatchStats>,
    // Cancels the dispatcher's `done` token when the loop exits or unwinds.
    _done: DropGuard,
}

impl<A: Acceptor> DispatchLoop<A> {
    pub(crate) fn new(
        acceptor: A,
        queue: mpsc::Receiver<Submission>,
        shutdown: CancellationToken,
        config: DispatcherConfig,
        lifecycle: Arc<LifecycleState>,
        stats: Arc<DispatchStats>,
        done: DropGuard,
    ) -> Self {
        let limits = acceptor.limits();
        Self {
            acceptor,
            limits,
            queue,
            shutdown,
            config,
            lifecycle,
            stats,
            _done: done,
        }
    }

    /// Runs until the shutdown token fires or every handle is dropped, then
    /// drains whatever was already queued.
    ///
    /// Shutdown never interrupts a submission that is being chunked; it only
    /// stops the loop from picking up the next one.
    pub(crate) async fn run(mut self) {
        self.lifecycle.advance(Lifecycle::Running);

        #[cfg(feature = "tracing")]
        tracing::debug!(limits = ?self.limits, "Dispatch loop started");

        loop {
            let submission = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                next = self.queue.recv() => match next {
                    Some(submission) => submission,
                    None => break,
                },
            };
            self.dispatch(submission).await;
        }

        self.lifecycle.advance(Lifecycle::Terminated);
        // Closing wakes any sender still waiting for the slot with an error.
        self.queue.close();

        #[cfg(feature = "tracing")]
        tracing::info!("Dispatcher terminated, draining queued submissions");

        while let Some(submission) = self.queue.recv().await {
            self.dispatch(submission).await;
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Dispatch loop stopped");
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            skip_all,
            fields(submission = submission.id, items = submission.batch.len())
        )
    )]
    async fn dispatch(&mut self, submission: Submission) {
        let Submission { batch, cancel, .. } = submission;

        let mut pending: &[Item] = &batch;

        while !pending.is_empty() {
            if cancel.is_cancelled() {
                #[cfg(feature = "tracing")]
                tracing::debug!("Submission cancelled, abandoning {} items", pending.len());
                self.stats.record_abandoned();
                return;
            }

            let (chunk, rest) = pending.split_at(self.limits.chunk_len(pending.len()));
            let outcome = self.acceptor.process(chunk);

            // Spacing is measured from the end of the call: the acceptor
            // timestamps on entry, so it always observes at least
            // `min_period` between consecutive calls.
            sleep(self.limits.min_period()).await;

            match outcome {
                Ok(()) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Delivered chunk of {} items", chunk.len());
                    self.stats.record_accepted(chunk.len());
                    pending = rest;
                }
                Err(err) if err.is_blocked() => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Chunk of {} items refused: {err}", chunk.len());
                    self.stats.record_blocked();

                    sleep(self.config.backoff).await;
                    self.refresh_limits();

                    if self.config.on_blocked == BlockedPolicy::Skip {
                        self.stats.record_dropped(chunk.len());
                        pending = rest;
                    }
                }
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Acceptor failed, dropping {} items: {_err}", chunk.len());
                    self.stats.record_dropped(chunk.len());
                    pending = rest;
                }
            }
        }

        self.stats.record_completed();
    }

    fn refresh_limits(&mut self) {
        let limits = self.acceptor.limits();

        #[cfg(feature = "tracing")]
        if limits != self.limits {
            tracing::info!(old = ?self.limits, new = ?limits, "Acceptor limits changed");
        }

        self.limits = limits;
        self.stats.record_refresh();
    }
}
