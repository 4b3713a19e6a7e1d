//! The indexer's consistent position

use {
    crate::types::Height,
    serde::{Deserialize, Serialize},
};

/// The last block we have fully and durably processed.
///
/// Invariant: `hash` is always the hash of the block at `height` as
/// currently believed stored. The sequencer is the only writer at runtime;
/// the sync driver reads it to decide what to fetch next.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub height: Height,
    pub hash: String,
}

impl Cursor {
    pub fn new(height: Height, hash: impl Into<String>) -> Self {
        Self {
            height,
            hash: hash.into(),
        }
    }

    /// The next height the pipeline expects to release.
    pub fn next_height(&self) -> Height {
        self.height + 1
    }
}
