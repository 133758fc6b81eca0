//! An in-memory index from block timestamps to block numbers.

use crate::constants::BTS_MAX_BLOCKS;

use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};

/// A block observation held by the [`TimestampCache`].
///
/// Ordered by timestamp first, then by block number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block {
    /// The unix timestamp of the block, in seconds.
    pub timestamp: u64,
    /// The number of the block.
    pub block_number: u64,
}

impl Block {
    /// Returns a new [`Block`].
    pub const fn new(timestamp: u64, block_number: u64) -> Self {
        Self { timestamp, block_number }
    }
}

/// The result of a [`TimestampCache::look_up`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookUp {
    /// The number of the last block at or before the timestamp, 0 if none.
    pub prev: u64,
    /// The number of the first block after the timestamp, 0 if none.
    pub next: u64,
    /// Whether `prev` and `next` are adjacent blocks.
    pub found: bool,
}

/// A size bounded cache of blocks ordered by timestamp.
///
/// The cache holds at most one entry per block number and its entries are always sorted by
/// `(timestamp, block_number)`. Each operation takes the cache lock for its whole duration, but
/// sequences of operations are not atomic.
#[derive(Debug)]
pub struct TimestampCache {
    max_size: usize,
    blocks: Mutex<VecDeque<Block>>,
}

impl Default for TimestampCache {
    fn default() -> Self {
        Self::new(BTS_MAX_BLOCKS)
    }
}

impl TimestampCache {
    /// Returns an empty cache retaining at most `max_size` blocks.
    pub fn new(max_size: usize) -> Self {
        Self { max_size: max_size.max(1), blocks: Mutex::new(VecDeque::with_capacity(max_size)) }
    }

    /// Adds the chain head to the cache.
    ///
    /// If the block does not extend the cache, everything after the last block older than the
    /// new one in both number and timestamp is dropped before appending.
    pub fn add_latest(&self, timestamp: u64, block_number: u64) {
        let block = Block::new(timestamp, block_number);
        let mut blocks = self.blocks.lock();

        if let Some(tail) = blocks.back().copied() {
            if block.block_number <= tail.block_number || block.timestamp < tail.timestamp {
                let retained = blocks
                    .iter()
                    .rposition(|b| b.block_number < block_number && b.timestamp <= timestamp)
                    .map_or(0, |idx| idx + 1);
                tracing::debug!(
                    target: "guardian::watcher",
                    ?tail,
                    ?block,
                    dropped = blocks.len() - retained,
                    "rollback detected in block cache"
                );
                blocks.truncate(retained);
            }
        }

        // a merged batch can leave block numbers out of timestamp order.
        blocks.retain(|b| b.block_number != block_number);
        blocks.push_back(block);
        if blocks.len() > self.max_size {
            blocks.pop_front();
        }
    }

    /// Merges a batch of blocks into the cache. A block replaces any cached entry with the same
    /// number, and later entries of the batch replace earlier ones.
    pub fn add_batch(&self, batch: impl IntoIterator<Item = Block>) {
        let mut blocks = self.blocks.lock();

        let mut by_number: BTreeMap<u64, Block> =
            blocks.drain(..).map(|b| (b.block_number, b)).collect();
        by_number.extend(batch.into_iter().map(|b| (b.block_number, b)));

        let mut merged: Vec<Block> = by_number.into_values().collect();
        merged.sort_unstable();

        let excess = merged.len().saturating_sub(self.max_size);
        blocks.extend(merged.into_iter().skip(excess));
    }

    /// Returns the blocks bracketing the timestamp.
    ///
    /// `prev` is the last block with a timestamp at or before the query and `next` the first
    /// block with a timestamp strictly after it. A bracket with no gap in block numbers is
    /// reported as found.
    pub fn look_up(&self, timestamp: u64) -> LookUp {
        let blocks = self.blocks.lock();
        let (Some(first), Some(last)) = (blocks.front(), blocks.back()) else {
            return LookUp::default();
        };

        let idx = blocks.partition_point(|b| b.timestamp <= timestamp);
        if idx == 0 {
            return LookUp { prev: 0, next: first.block_number, found: false };
        }
        if idx == blocks.len() {
            return LookUp { prev: last.block_number, next: 0, found: false };
        }

        let prev = blocks[idx - 1].block_number;
        let next = blocks[idx].block_number;
        LookUp { prev, next, found: prev + 1 == next }
    }

    /// Returns the first and last blocks of the cache.
    pub fn range(&self) -> Option<(Block, Block)> {
        let blocks = self.blocks.lock();
        Some((*blocks.front()?, *blocks.back()?))
    }

    /// Returns the number of cached blocks.
    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.lock().is_empty()
    }

    /// Returns a copy of the cached blocks.
    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.lock().iter().copied().collect()
    }
}
