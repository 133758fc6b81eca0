use std::sync::atomic::{AtomicU64, Ordering};

/// A snapshot of the block heights tracked by the watcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHeights {
    /// The latest block number.
    pub latest: u64,
    /// The latest safe block number.
    pub safe: u64,
    /// The latest finalized block number.
    pub finalized: u64,
}

/// The block heights shared between the header processing, the reobservation and the query
/// paths.
#[derive(Debug, Default)]
pub struct AtomicBlockHeights {
    latest: AtomicU64,
    safe: AtomicU64,
    finalized: AtomicU64,
}

impl AtomicBlockHeights {
    /// Returns the latest block number.
    pub fn latest(&self) -> u64 {
        self.latest.load(Ordering::Acquire)
    }

    /// Returns the latest safe block number.
    pub fn safe(&self) -> u64 {
        self.safe.load(Ordering::Acquire)
    }

    /// Returns the latest finalized block number.
    pub fn finalized(&self) -> u64 {
        self.finalized.load(Ordering::Acquire)
    }

    pub(crate) fn set_latest(&self, number: u64) {
        self.latest.store(number, Ordering::Release);
    }

    pub(crate) fn set_safe(&self, number: u64) {
        self.safe.store(number, Ordering::Release);
    }

    pub(crate) fn set_finalized(&self, number: u64) {
        self.finalized.store(number, Ordering::Release);
    }

    /// Returns a snapshot of the heights.
    pub fn snapshot(&self) -> BlockHeights {
        BlockHeights { latest: self.latest(), safe: self.safe(), finalized: self.finalized() }
    }
}
