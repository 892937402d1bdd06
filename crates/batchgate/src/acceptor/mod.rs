//! The downstream side of the dispatcher.
//!
//! An [`Acceptor`] takes work in bounded chunks, no faster than a minimum
//! period, and signals overload with [`Error::Blocked`](crate::Error::Blocked).
//! [`RateLimitedAcceptor`] is the reference implementation of that contract:
//! it freezes on any rejection and thaws once a call arrives more than a
//! freeze window after the previous one.

mod rate;

pub use rate::*;

use crate::{Item, Limits, Result};
use core::time::Duration;

/// Cool-down an acceptor enforces after a rejection before it considers
/// unfreezing. The dispatcher backs off for the same amount by default.
pub const FREEZE_WINDOW: Duration = Duration::from_secs(5);

/// A work sink with a bounded accept rate and size.
///
/// The dispatch loop owns its acceptor exclusively, so `process` takes
/// `&mut self` and at most one call is ever in flight.
pub trait Acceptor: Send + 'static {
    /// Current per-call limits. Must not fail.
    fn limits(&self) -> Limits;

    /// Offers one chunk. Never sleeps; pacing is the caller's job.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Blocked`](crate::Error::Blocked) when the chunk is
    /// rejected.
    fn process(&mut self, batch: &[Item]) -> Result<()>;
}

impl<A: Acceptor + ?Sized> Acceptor for Box<A> {
    fn limits(&self) -> Limits {
        (**self).limits()
    }

    fn process(&mut self, batch: &[Item]) -> Result<()> {
        (**self).process(batch)
    }
}
