use super::block_id::BlockIdError;
use crate::error::ConnectorError;

use guardian_primitives::query::QueryStatus;

/// An error when executing a query. Each error maps to the status returned to the caller.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The block identifier is invalid.
    #[error(transparent)]
    BlockId(#[from] BlockIdError),
    /// The batch could not be executed.
    #[error("failed to execute batch: {0}")]
    Batch(#[from] ConnectorError),
    /// A block lookup of the batch failed or returned an invalid block.
    #[error("invalid {label} block result: {reason}")]
    InvalidBlock {
        /// The block the lookup was for.
        label: &'static str,
        /// The failure.
        reason: String,
    },
    /// The block is above the maximum block number served by the watcher.
    #[error("block number {number} is above the maximum {max}")]
    BlockNumberTooHigh {
        /// The block number.
        number: u64,
        /// The maximum block number.
        max: u64,
    },
    /// A call of the batch failed.
    #[error("call {index} failed: {reason}")]
    Call {
        /// The index of the call.
        index: usize,
        /// The failure.
        reason: String,
    },
    /// A call of the batch returned no data.
    #[error("call {0} returned an empty result")]
    EmptyResult(usize),
    /// The finality is neither `safe` nor `finalized`.
    #[error("invalid finality {0:?}")]
    InvalidFinality(String),
    /// The block has not reached the requested finality yet.
    #[error("block {number} is not yet {finality}, latest {finality} block is {latest}")]
    NotFinal {
        /// The block number.
        number: u64,
        /// The requested finality.
        finality: &'static str,
        /// The latest block number with this finality.
        latest: u64,
    },
    /// Only one of the block hints is set.
    #[error("target and following block hints must both be set or both be unset")]
    InconsistentHints,
    /// The target and following blocks are not consecutive.
    #[error("target block {target} and following block {following} are not adjacent")]
    NotAdjacent {
        /// The target block number.
        target: u64,
        /// The following block number.
        following: u64,
    },
    /// The target timestamp is outside of the target block interval.
    #[error("timestamp {timestamp} is not in [{target_time}, {following_time})")]
    TimestampOutOfRange {
        /// The requested timestamp, in microseconds.
        timestamp: u64,
        /// The target block time, in microseconds.
        target_time: u64,
        /// The following block time, in microseconds.
        following_time: u64,
    },
    /// The watcher does not maintain a block cache.
    #[error("block timestamp cache is not supported on this chain")]
    CacheUnsupported,
    /// The block cache is empty.
    #[error("block timestamp cache is empty")]
    CacheEmpty,
    /// The timestamp is before the oldest cached block.
    #[error("timestamp {0} is before the oldest cached block")]
    TimestampTooOld(u64),
    /// The timestamp is at or after the newest cached block.
    #[error("timestamp {0} is not yet covered by the block cache")]
    TimestampTooRecent(u64),
    /// The timestamp falls in a gap of the block cache.
    #[error("timestamp {timestamp} falls between blocks {prev} and {next} of the block cache")]
    CacheGap {
        /// The timestamp, in seconds.
        timestamp: u64,
        /// The cached block before the timestamp.
        prev: u64,
        /// The cached block after the timestamp.
        next: u64,
        /// Whether a backfill was requested.
        backfill_requested: bool,
    },
    /// The query type is not supported.
    #[error("unsupported query type {0}")]
    UnsupportedQueryType(u8),
    /// The query was routed to the wrong chain.
    #[error("query for chain {got} routed to chain {expected}")]
    WrongChain {
        /// The chain of the query.
        got: u16,
        /// The chain of the watcher.
        expected: u16,
    },
}

impl QueryError {
    /// Returns the status reported to the caller for this error.
    pub const fn status(&self) -> QueryStatus {
        match self {
            Self::Batch(_) |
            Self::InvalidBlock { .. } |
            Self::BlockNumberTooHigh { .. } |
            Self::Call { .. } |
            Self::EmptyResult(_) |
            Self::NotFinal { .. } |
            Self::CacheEmpty |
            Self::TimestampTooRecent(_) |
            Self::CacheGap { backfill_requested: true, .. } => QueryStatus::RetryNeeded,
            Self::BlockId(_) |
            Self::InvalidFinality(_) |
            Self::InconsistentHints |
            Self::NotAdjacent { .. } |
            Self::TimestampOutOfRange { .. } |
            Self::CacheUnsupported |
            Self::TimestampTooOld(_) |
            Self::CacheGap { backfill_requested: false, .. } |
            Self::UnsupportedQueryType(_) |
            Self::WrongChain { .. } => QueryStatus::FatalError,
        }
    }
}
