//! Error types for the batch dispatcher.
//!
//! This module defines the central `Error` enum shared by the acceptor and the
//! dispatcher. Only two variants ever reach a caller of
//! [`Dispatcher::send`](crate::Dispatcher::send): `Terminated` and
//! `Cancelled`. `Blocked` is absorbed by the dispatch loop.
//!
//! ## Error Cases
//! - `Blocked`: The acceptor rejected a chunk (too soon or too large) and is
//!   now frozen.
//! - `Terminated`: The dispatcher has been shut down and refuses new work.
//! - `Cancelled`: The caller gave up before its submission was handed off.
//! - `InvalidConfig`: A builder was given values outside their domain.
//! - `ShutdownTimeout`: The dispatch loop did not drain within the grace
//!   period.

use core::fmt;
use core::time::Duration;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the dispatcher and acceptor.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The acceptor refused the chunk and entered its frozen state.
    #[error("Acceptor blocked: {0}")]
    Blocked(BlockReason),

    /// The dispatcher was terminated; no new submissions are accepted.
    #[error("Dispatcher is terminated")]
    Terminated,

    /// The submission's own cancellation fired before handoff.
    #[error("Submission cancelled before handoff")]
    Cancelled,

    /// A configuration value was rejected.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The dispatch loop was still draining when the grace period expired.
    #[error("Dispatcher did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}

/// Why an acceptor refused a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockReason {
    /// The call arrived before `min_period` elapsed since the previous call.
    TooSoon {
        elapsed: Duration,
        min_period: Duration,
    },
    /// The chunk carried more items than the acceptor takes per call.
    TooLarge { len: usize, max_items: usize },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSoon {
                elapsed,
                min_period,
            } => write!(f, "called after {elapsed:?}, minimum period is {min_period:?}"),
            Self::TooLarge { len, max_items } => {
                write!(f, "chunk of {len} items exceeds limit of {max_items}")
            }
        }
    }
}

impl Error {
    /// Returns `true` for the overload signal produced by an acceptor.
    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}
