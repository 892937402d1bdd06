//! Buffered, paced delivery of batches into an [`Acceptor`](crate::Acceptor).
//!
//! Callers hand batches to a [`Dispatcher`] through a single-slot queue. One
//! dispatch loop per dispatcher pulls submissions in arrival order, cuts each
//! into chunks no larger than the acceptor's `max_items`, and spaces calls by
//! at least `min_period`. A refused chunk triggers a fixed backoff followed by
//! a limits refresh before the next chunk is sized.
//!
//! ## Cancellation scopes
//!
//! - Per submission: the token given to [`Dispatcher::send`]. Checked between
//!   chunks; the unsent remainder is abandoned without error.
//! - Dispatcher-wide: the token given to [`Dispatcher::spawn`]. New sends fail
//!   with [`Error::Terminated`](crate::Error::Terminated); work already queued
//!   still drains.
//!
//! ## Structure
//!
//! - `handle` - [`Dispatcher`], the caller-facing handle and `send`.
//! - `worker` - the dispatch loop.
//! - `cell` - once-only construction shared across tasks ([`DispatcherCell`]).

mod cell;
mod config;
mod handle;
mod lifecycle;
mod stats;
mod submission;
#[cfg(test)]
mod tests;
mod worker;

pub use cell::*;
pub use config::*;
pub use handle::*;
pub use lifecycle::Lifecycle;
pub use stats::*;
