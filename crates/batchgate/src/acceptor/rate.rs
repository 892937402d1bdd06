use super::{Acceptor, FREEZE_WINDOW};
use crate::{BlockReason, Error, Item, Limits, Result};
use core::{fmt, num::NonZeroUsize, time::Duration};
use tokio::time::Instant;

/// Callback invoked synchronously with every accepted chunk.
pub type Consumer = Box<dyn FnMut(&[Item]) + Send>;

/// An acceptor that enforces a chunk size and call spacing, freezing on
/// every violation.
///
/// The state machine has two states, `Active` and `Frozen`:
///
/// - Any rejection moves it to `Frozen`, whichever rule triggered it.
/// - Every call first measures the time since the *previous* call and, when
///   frozen and that gap exceeds the freeze window, returns to `Active`.
/// - The time of the previous call is updated on every call, rejected or
///   not, which is what lets the freeze window eventually expire.
///
/// The very first call has no predecessor and is never rejected for timing.
///
/// # Example
///
/// ```
/// use batchgate::{Acceptor, Item, RateLimitedAcceptor};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> batchgate::Result<()> {
/// let mut acceptor = RateLimitedAcceptor::builder()
///     .max_items(2)
///     .min_period(Duration::from_millis(100))
///     .build()?;
///
/// assert!(acceptor.process(&[Item::new(1)]).is_ok());
/// // Too soon after the previous call.
/// assert!(acceptor.process(&[Item::new(2)]).is_err());
/// # Ok(())
/// # }
/// ```
pub struct RateLimitedAcceptor {
    limits: Limits,
    freeze_window: Duration,
    last_call: Option<Instant>,
    frozen: bool,
    consumer: Option<Consumer>,
}

impl RateLimitedAcceptor {
    pub fn builder() -> RateLimitedAcceptorBuilder {
        RateLimitedAcceptorBuilder::default()
    }

    /// How long a gap must exceed before a frozen acceptor thaws.
    pub const fn freeze_window(&self) -> Duration {
        self.freeze_window
    }

    #[cfg(test)]
    pub(crate) const fn is_frozen(&self) -> bool {
        self.frozen
    }
}

impl fmt::Debug for RateLimitedAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitedAcceptor")
            .field("limits", &self.limits)
            .field("freeze_window", &self.freeze_window)
            .field("last_call", &self.last_call)
            .field("frozen", &self.frozen)
            .field("consumer", &self.consumer.is_some())
            .finish()
    }
}

impl Acceptor for RateLimitedAcceptor {
    fn limits(&self) -> Limits {
        self.limits
    }

    fn process(&mut self, batch: &[Item]) -> Result<()> {
        let now = Instant::now();
        let elapsed = self.last_call.map(|last| now.saturating_duration_since(last));
        self.last_call = Some(now);

        if self.frozen && elapsed.is_none_or(|gap| gap > self.freeze_window) {
            #[cfg(feature = "tracing")]
            tracing::debug!("Acceptor thawed after {:?}", elapsed);
            self.frozen = false;
        }

        if let Some(reason) = self.violation(elapsed, batch.len()) {
            #[cfg(feature = "tracing")]
            tracing::warn!("Acceptor frozen: {reason}");
            self.frozen = true;
            return Err(Error::Blocked(reason));
        }

        if let Some(consumer) = self.consumer.as_mut() {
            consumer(batch);
        }
        Ok(())
    }
}

impl RateLimitedAcceptor {
    fn violation(&self, elapsed: Option<Duration>, len: usize) -> Option<BlockReason> {
        let min_period = self.limits.min_period();
        match elapsed {
            Some(elapsed) if elapsed < min_period => {
                return Some(BlockReason::TooSoon {
                    elapsed,
                    min_period,
                });
            }
            _ => {}
        }

        match self.limits.max_items() {
            Some(max) if len > max.get() => Some(BlockReason::TooLarge {
                len,
                max_items: max.get(),
            }),
            _ => None,
        }
    }
}

/// Builder for [`RateLimitedAcceptor`].
///
/// Mirrors the acceptor's configuration knobs: chunk size, call spacing,
/// freeze window and an optional consumer callback.
#[derive(Default)]
pub struct RateLimitedAcceptorBuilder {
    max_items: Option<usize>,
    min_period: Duration,
    freeze_window: Option<Duration>,
    consumer: Option<Consumer>,
}

impl RateLimitedAcceptorBuilder {
    /// Maximum items per call. Leaving it unset accepts any chunk size.
    #[must_use]
    pub fn max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }

    /// Minimum spacing between the starts of consecutive calls.
    #[must_use]
    pub fn min_period(mut self, min_period: Duration) -> Self {
        self.min_period = min_period;
        self
    }

    /// Overrides [`FREEZE_WINDOW`].
    #[must_use]
    pub fn freeze_window(mut self, freeze_window: Duration) -> Self {
        self.freeze_window = Some(freeze_window);
        self
    }

    /// Callback run on every accepted chunk.
    #[must_use]
    pub fn consumer<F>(mut self, consumer: F) -> Self
    where
        F: FnMut(&[Item]) + Send + 'static,
    {
        self.consumer = Some(Box::new(consumer));
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when `max_items` was set to zero.
    pub fn build(self) -> Result<RateLimitedAcceptor> {
        let limits = match self.max_items {
            Some(max) => {
                let max = NonZeroUsize::new(max).ok_or_else(|| Error::InvalidConfig {
                    reason: "max_items must be greater than 0".to_string(),
                })?;
                Limits::new(max, self.min_period)
            }
            None => Limits::unbounded(self.min_period),
        };

        Ok(RateLimitedAcceptor {
            limits,
            freeze_window: self.freeze_window.unwrap_or(FREEZE_WINDOW),
            last_call: None,
            frozen: false,
            consumer: self.consumer,
        })
    }
}
