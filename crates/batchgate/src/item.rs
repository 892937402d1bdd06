/// A single unit of work.
///
/// The dispatcher never interprets an item beyond its identity; it only
/// guarantees that items reach the acceptor in the order they were submitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Item {
    pub id: u64,
}

impl Item {
    pub const fn new(id: u64) -> Self {
        Self { id }
    }
}

impl From<u64> for Item {
    fn from(id: u64) -> Self {
        Self { id }
    }
}

/// An ordered sequence of [`Item`]s. May be empty.
pub type Batch = Vec<Item>;

/// Builds a batch of `len` items with sequential ids starting at zero.
pub fn sequential_batch(len: usize) -> Batch {
    (0..len as u64).map(Item::new).collect()
}
