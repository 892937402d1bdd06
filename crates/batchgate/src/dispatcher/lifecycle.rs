use core::fmt;
use portable_atomic::{AtomicU8, Ordering};

/// Observable state of a dispatcher. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Lifecycle {
    Created = 0,
    Running = 1,
    Terminated = 2,
}

impl Lifecycle {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Running,
            _ => Self::Terminated,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub(crate) struct LifecycleState(AtomicU8);

impl LifecycleState {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(Lifecycle::Created as u8))
    }

    pub(crate) fn load(&self) -> Lifecycle {
        Lifecycle::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves to `next` unless the state is already further along.
    pub(crate) fn advance(&self, next: Lifecycle) {
        self.0.fetch_max(next as u8, Ordering::AcqRel);
    }
}
