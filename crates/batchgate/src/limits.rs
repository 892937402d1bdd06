use core::num::NonZeroUsize;
use core::time::Duration;

/// Per-call constraints advertised by an [`Acceptor`](crate::Acceptor).
///
/// Limits are treated as live values: the dispatcher reads them once at
/// construction and again after every overload signal, so an acceptor may
/// change them over its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    max_items: Option<NonZeroUsize>,
    min_period: Duration,
}

impl Limits {
    /// Limits with a bounded chunk size.
    pub const fn new(max_items: NonZeroUsize, min_period: Duration) -> Self {
        Self {
            max_items: Some(max_items),
            min_period,
        }
    }

    /// Limits that only pace calls; any chunk size is accepted.
    pub const fn unbounded(min_period: Duration) -> Self {
        Self {
            max_items: None,
            min_period,
        }
    }

    /// Maximum number of items per call, or `None` when unset.
    pub const fn max_items(&self) -> Option<NonZeroUsize> {
        self.max_items
    }

    /// Minimum time between the starts of two consecutive calls.
    pub const fn min_period(&self) -> Duration {
        self.min_period
    }

    /// Size of the next chunk to cut from `remaining` items.
    pub fn chunk_len(&self, remaining: usize) -> usize {
        match self.max_items {
            Some(max) => remaining.min(max.get()),
            None => remaining,
        }
    }

    /// Whether a chunk of `len` items fits in a single call.
    pub fn admits(&self, len: usize) -> bool {
        self.max_items.is_none_or(|max| len <= max.get())
    }
}
