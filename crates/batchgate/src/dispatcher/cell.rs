use super::Dispatcher;
use std::sync::OnceLock;

/// Construct-once holder for a shared [`Dispatcher`].
///
/// However many tasks or threads race on [`get_or_spawn`](Self::get_or_spawn),
/// exactly one initializer runs, so exactly one dispatch loop is spawned and
/// every caller gets a handle to it.
#[derive(Default)]
pub struct DispatcherCell {
    cell: OnceLock<Dispatcher>,
}

impl DispatcherCell {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Returns the shared dispatcher, running `init` only if none exists yet.
    pub fn get_or_spawn<F>(&self, init: F) -> Dispatcher
    where
        F: FnOnce() -> Dispatcher,
    {
        self.cell.get_or_init(init).clone()
    }

    pub fn get(&self) -> Option<Dispatcher> {
        self.cell.get().cloned()
    }
}
