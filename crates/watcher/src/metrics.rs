use crate::pending::OrphanReason;

use metrics::{Counter, Gauge, Histogram};
use metrics_derive::Metrics;

/// The metrics for the [`super::Watcher`].
#[derive(Metrics, Clone)]
#[metrics(scope = "evm_watcher")]
pub struct WatcherMetrics {
    /// A counter on the messages observed.
    pub messages_observed: Counter,
    /// A counter on the messages confirmed and published.
    pub messages_confirmed: Counter,
    /// A counter on the messages published by reobservation.
    pub messages_reobserved: Counter,
    /// A counter on the observations orphaned because the transaction was not found.
    pub orphaned_not_found: Counter,
    /// A counter on the observations orphaned because the transaction failed.
    pub orphaned_tx_failed: Counter,
    /// A counter on the observations orphaned because the block hash changed.
    pub orphaned_blockhash_mismatch: Counter,
    /// A counter on the observations orphaned because they timed out.
    pub orphaned_timeout: Counter,
    /// A counter on the connection errors.
    pub connection_errors: Counter,
    /// A counter on the custom consistency resolutions that fell back to finalized.
    pub ccl_fallbacks: Counter,
    /// A counter on the guardian set changes.
    pub guardian_set_changes: Counter,
    /// The number of pending observations.
    pub pending_observations: Gauge,
    /// The latest block height.
    pub latest_height: Gauge,
    /// The latest safe block height.
    pub safe_height: Gauge,
    /// The latest finalized block height.
    pub finalized_height: Gauge,
    /// A histogram of the receipt request durations.
    pub receipt_duration: Histogram,
}

impl WatcherMetrics {
    /// Records an orphaned observation.
    pub fn orphaned(&self, reason: OrphanReason) {
        match reason {
            OrphanReason::NotFound => self.orphaned_not_found.increment(1),
            OrphanReason::TxFailed => self.orphaned_tx_failed.increment(1),
            OrphanReason::BlockHashMismatch => self.orphaned_blockhash_mismatch.increment(1),
            OrphanReason::Timeout => self.orphaned_timeout.increment(1),
        }
    }
}

/// The metrics for the [`crate::ccq::QueryExecutor`] and the backfill coordinator.
#[derive(Metrics, Clone)]
#[metrics(scope = "evm_watcher_ccq")]
pub struct QueryMetrics {
    /// A counter on the queries received.
    pub queries: Counter,
    /// A counter on the successful queries.
    pub success: Counter,
    /// A counter on the queries that need a retry.
    pub retry_needed: Counter,
    /// A counter on the queries that failed.
    pub fatal_errors: Counter,
    /// A counter on the responses dropped because the channel was full.
    pub responses_dropped: Counter,
    /// A counter on the backfill requests.
    pub backfill_requests: Counter,
    /// A counter on the backfill requests dropped because the queue was full.
    pub backfill_requests_dropped: Counter,
    /// A counter on the blocks added to the cache by backfill.
    pub blocks_backfilled: Counter,
    /// A histogram of the query durations.
    pub query_duration: Histogram,
}
