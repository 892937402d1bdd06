use crate::Batch;
use tokio_util::sync::CancellationToken;

/// One caller's batch plus the token that lets the caller give up on it.
///
/// Created by [`Dispatcher::send`](super::Dispatcher::send) and owned by the
/// dispatch loop once handed off.
#[derive(Debug)]
pub(crate) struct Submission {
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    pub(crate) id: u64,
    pub(crate) batch: Batch,
    pub(crate) cancel: CancellationToken,
}
