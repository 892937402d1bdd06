#![doc = include_str!("../README.md")]

mod acceptor;
mod dispatcher;
mod error;
mod item;
mod limits;

pub use crate::acceptor::*;
pub use crate::dispatcher::*;
pub use crate::error::*;
pub use crate::item::*;
pub use crate::limits::*;
// Re-exported so callers can build cancellation scopes without naming
// `tokio-util` themselves.
pub use tokio_util::sync::CancellationToken;
