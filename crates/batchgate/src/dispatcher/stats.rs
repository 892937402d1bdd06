use portable_atomic::{AtomicU64, Ordering};

/// Running counters for a dispatcher.
///
/// Written by the dispatch loop and by `send`, readable from any task.
/// Counters are independent, so a [`snapshot`](Self::snapshot) taken
/// mid-chunk may be momentarily inconsistent across fields.
#[derive(Debug, Default)]
pub struct DispatchStats {
    submissions_received: AtomicU64,
    submissions_completed: AtomicU64,
    submissions_abandoned: AtomicU64,
    chunks_accepted: AtomicU64,
    chunks_blocked: AtomicU64,
    items_accepted: AtomicU64,
    items_dropped: AtomicU64,
    limit_refreshes: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Submissions that made it through [`Dispatcher::send`](super::Dispatcher::send).
    pub submissions_received: u64,
    pub submissions_completed: u64,
    pub submissions_abandoned: u64,
    pub chunks_accepted: u64,
    pub chunks_blocked: u64,
    pub items_accepted: u64,
    pub items_dropped: u64,
    pub limit_refreshes: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submissions_received: self.submissions_received.load(Ordering::Relaxed),
            submissions_completed: self.submissions_completed.load(Ordering::Relaxed),
            submissions_abandoned: self.submissions_abandoned.load(Ordering::Relaxed),
            chunks_accepted: self.chunks_accepted.load(Ordering::Relaxed),
            chunks_blocked: self.chunks_blocked.load(Ordering::Relaxed),
            items_accepted: self.items_accepted.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            limit_refreshes: self.limit_refreshes.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_received(&self) {
        self.submissions_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.submissions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abandoned(&self) {
        self.submissions_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accepted(&self, items: usize) {
        self.chunks_accepted.fetch_add(1, Ordering::Relaxed);
        self.items_accepted.fetch_add(items as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_blocked(&self) {
        self.chunks_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, items: usize) {
        self.items_dropped.fetch_add(items as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_refresh(&self) {
        self.limit_refreshes.fetch_add(1, Ordering::Relaxed);
    }
}
