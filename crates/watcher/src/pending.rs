//! The observations waiting for their block to reach the required consistency.

use crate::{
    ccl::should_publish,
    connector::Receipt,
    constants::{CONFIRMATION_TIMEOUT_MULTIPLIER, MAX_WAIT_CONFIRMATIONS},
    error::ConnectorResult,
    heights::BlockHeights,
};

use alloy_primitives::B256;
use guardian_primitives::{ConsistencyLevel, MessagePublication};
use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
};

/// The key of a pending observation. The block hash distinguishes a transaction that reappears
/// in another block after a reorg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingKey {
    /// The transaction hash.
    pub tx_hash: B256,
    /// The hash of the block the message was observed in.
    pub block_hash: B256,
    /// The emitter address.
    pub emitter_address: B256,
    /// The emitter sequence.
    pub sequence: u64,
}

impl PendingKey {
    /// Returns the key of the message observed in the given block.
    pub const fn new(message: &MessagePublication, block_hash: B256) -> Self {
        Self {
            tx_hash: message.tx_id,
            block_hash,
            emitter_address: message.emitter_address,
            sequence: message.sequence,
        }
    }
}

/// An observed message waiting for confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingObservation {
    /// The message.
    pub message: MessagePublication,
    /// The block number the message was observed at.
    pub height: u64,
    /// The number of blocks to wait past the base consistency level.
    pub additional_blocks: u64,
}

/// The reason an observation was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrphanReason {
    /// The transaction receipt is no longer available.
    NotFound,
    /// The transaction failed.
    TxFailed,
    /// The transaction was included in another block.
    BlockHashMismatch,
    /// The observation was not confirmed in time.
    Timeout,
}

impl Display for OrphanReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::TxFailed => write!(f, "tx_failed"),
            Self::BlockHashMismatch => write!(f, "blockhash_mismatch"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Whether a pending observation should be checked against the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The required consistency is not reached yet.
    Waiting,
    /// The required consistency is reached, the receipt should be checked.
    Ready,
    /// The observation waited too long.
    TimedOut,
}

/// The outcome of checking the receipt of a ready observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptOutcome {
    /// The transaction is still included in the observed block.
    Confirmed,
    /// The observation will never be confirmed.
    Orphaned(OrphanReason),
    /// The receipt could not be fetched, retry on the next header.
    Retry,
}

/// Returns the number of confirmations to wait for a message requesting `confirmations`.
pub fn expected_confirmations(confirmations: u8, min_confirmations: u64) -> u64 {
    u64::from(confirmations).max(min_confirmations).max(1)
}

impl PendingObservation {
    /// Returns the consistency level of the message.
    pub fn consistency_level(&self) -> ConsistencyLevel {
        self.message.consistency_level.into()
    }

    /// Returns the readiness of the observation for the given heights.
    pub fn readiness(&self, min_confirmations: u64, heights: BlockHeights) -> Readiness {
        let level = self.consistency_level();
        if self.additional_blocks > 0 {
            return if should_publish(level, self.height, self.additional_blocks, heights) {
                Readiness::Ready
            } else {
                Readiness::Waiting
            };
        }

        let reached = match level {
            ConsistencyLevel::Confirmations(n) => {
                let expected = expected_confirmations(n, min_confirmations);
                if self.height + CONFIRMATION_TIMEOUT_MULTIPLIER * expected <= heights.latest {
                    return Readiness::TimedOut;
                }
                self.height + expected <= heights.latest
            }
            ConsistencyLevel::Safe => self.height <= heights.safe,
            // unresolved custom levels are held until finalized.
            ConsistencyLevel::Finalized | ConsistencyLevel::Custom => {
                self.height <= heights.finalized
            }
            ConsistencyLevel::PublishImmediately => true,
        };

        if reached {
            Readiness::Ready
        } else {
            Readiness::Waiting
        }
    }

    /// Returns true if a ready observation whose receipt keeps failing should be dropped.
    ///
    /// Confirmation based observations are bounded by [`Readiness::TimedOut`] instead.
    pub fn retries_exhausted(&self, heights: BlockHeights) -> bool {
        let base = match self.consistency_level() {
            ConsistencyLevel::Confirmations(_) => return false,
            ConsistencyLevel::Safe => heights.safe,
            ConsistencyLevel::Finalized | ConsistencyLevel::Custom => heights.finalized,
            ConsistencyLevel::PublishImmediately => heights.latest,
        };
        self.height + self.additional_blocks + MAX_WAIT_CONFIRMATIONS <= base
    }
}

/// Classifies the result of a receipt request for an observation made in `observed_block_hash`.
pub fn classify_receipt(
    result: &ConnectorResult<Option<Receipt>>,
    observed_block_hash: B256,
) -> ReceiptOutcome {
    match result {
        Ok(None) => ReceiptOutcome::Orphaned(OrphanReason::NotFound),
        Err(err) if err.is_not_found() => ReceiptOutcome::Orphaned(OrphanReason::NotFound),
        Err(_) => ReceiptOutcome::Retry,
        Ok(Some(receipt)) if !receipt.status => ReceiptOutcome::Orphaned(OrphanReason::TxFailed),
        Ok(Some(receipt)) if receipt.block_hash != observed_block_hash => {
            ReceiptOutcome::Orphaned(OrphanReason::BlockHashMismatch)
        }
        Ok(Some(_)) => ReceiptOutcome::Confirmed,
    }
}

/// The map of pending observations.
#[derive(Debug, Default)]
pub struct PendingObservations {
    entries: HashMap<PendingKey, PendingObservation>,
}

impl PendingObservations {
    /// Inserts the observation. Returns false and keeps the existing entry if the key is already
    /// tracked.
    pub fn insert(&mut self, key: PendingKey, observation: PendingObservation) -> bool {
        match self.entries.entry(key) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(observation);
                true
            }
        }
    }

    /// Returns the observation for the key.
    pub fn get(&self, key: &PendingKey) -> Option<&PendingObservation> {
        self.entries.get(key)
    }

    /// Removes the observation for the key.
    pub fn remove(&mut self, key: &PendingKey) -> Option<PendingObservation> {
        self.entries.remove(key)
    }

    /// Returns the keys of all pending observations.
    pub fn keys(&self) -> Vec<PendingKey> {
        self.entries.keys().copied().collect()
    }

    /// Returns the number of pending observations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no pending observations.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
