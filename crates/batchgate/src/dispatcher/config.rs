use crate::{Error, FREEZE_WINDOW};
use core::{fmt, str::FromStr, time::Duration};

/// What the dispatch loop does with a chunk the acceptor refused.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlockedPolicy {
    /// Drop the refused chunk and continue with the rest of the batch.
    #[default]
    Skip,
    /// Re-cut the refused items against the refreshed limits and offer them
    /// again.
    Retry,
}

impl fmt::Display for BlockedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Skip => "skip",
            Self::Retry => "retry",
        })
    }
}

impl FromStr for BlockedPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "retry" => Ok(Self::Retry),
            other => Err(Error::InvalidConfig {
                reason: format!("unknown blocked policy `{other}` (expected `skip` or `retry`)"),
            }),
        }
    }
}

/// Tuning for the dispatch loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Extra wait after a refused chunk, on top of the pacing delay. Limits
    /// are refreshed once it elapses.
    ///
    /// The default is [`FREEZE_WINDOW`], not the window of any particular
    /// acceptor. Use [`for_freeze_window`](Self::for_freeze_window) when the
    /// acceptor was built with a different window.
    pub backoff: Duration,
    pub on_blocked: BlockedPolicy,
}

impl DispatcherConfig {
    /// Backs off for exactly `freeze_window`, so the next call after a
    /// refusal lands once the acceptor can thaw.
    pub const fn for_freeze_window(freeze_window: Duration) -> Self {
        Self {
            backoff: freeze_window,
            on_blocked: BlockedPolicy::Skip,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::for_freeze_window(FREEZE_WINDOW)
    }
}
