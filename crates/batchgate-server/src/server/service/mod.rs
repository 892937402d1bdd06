//! HTTP service wiring.
//!
//! ## Structure
//!
//! - [`handler`] - routes and the [`BatchService`](handler::BatchService)
//!   state they share.

pub mod handler;
