//! Fills the block timestamp cache with historical blocks.

use crate::{
    connector::{with_timeout, BatchCall, BlockMarshaller},
    constants::{
        BACKFILL_MAX_BATCH_SIZE, BACKFILL_REQUEST_CAPACITY, BACKFILL_TIMEOUT, BACKFILL_WINDOW,
        BTS_MAX_BLOCKS,
    },
    error::ConnectorError,
    metrics::QueryMetrics,
    timestamp_cache::{Block, TimestampCache},
    EvmConnector,
};

use serde_json::json;
use std::{future::Future, ops::RangeInclusive, sync::Arc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// An error during a backfill.
#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    /// The connector failed.
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    /// The node returned no block for the number.
    #[error("missing block {0}")]
    MissingBlock(u64),
    /// The node rejected even a batch of a single block.
    #[error("no batch size accepted by the node")]
    NoBatchSize,
}

/// Returns the largest size in `[1, ceiling]` accepted by `probe`, assuming that a size is
/// accepted whenever a larger one is. Returns [`None`] if no size is accepted.
pub async fn find_max_batch_size<F, Fut>(ceiling: u64, mut probe: F) -> Option<u64>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = bool>,
{
    if ceiling == 0 {
        return None;
    }
    if probe(ceiling).await {
        return Some(ceiling);
    }

    // `success` is accepted (or 0), `failure` is rejected.
    let (mut success, mut failure) = (0, ceiling);
    while failure - success > 1 {
        let mid = success + (failure - success) / 2;
        if probe(mid).await {
            success = mid;
        } else {
            failure = mid;
        }
    }

    (success > 0).then_some(success)
}

/// Fetches the blocks in the range in a single batch.
async fn fetch_blocks<C: EvmConnector>(
    connector: &C,
    numbers: RangeInclusive<u64>,
) -> Result<Vec<Block>, BackfillError> {
    let calls = numbers
        .clone()
        .map(|n| BatchCall::new("eth_getBlockByNumber", json!([format!("0x{n:x}"), false])))
        .collect::<Vec<_>>();
    if calls.is_empty() {
        return Ok(vec![]);
    }

    let results = with_timeout(BACKFILL_TIMEOUT, connector.raw_batch_call(calls)).await?;
    numbers.zip(results).map(|(number, result)| parse_block(number, result)).collect()
}

/// Fetches the chain head.
async fn fetch_latest<C: EvmConnector>(connector: &C) -> Result<Block, BackfillError> {
    let calls = vec![BatchCall::new("eth_getBlockByNumber", json!(["latest", false]))];
    let result = with_timeout(BACKFILL_TIMEOUT, connector.raw_batch_call(calls))
        .await?
        .into_iter()
        .next()
        .ok_or(BackfillError::MissingBlock(0))?;
    parse_block(0, result)
}

fn parse_block(
    number: u64,
    result: Result<serde_json::Value, ConnectorError>,
) -> Result<Block, BackfillError> {
    let block = BlockMarshaller::from_value(result?)?.ok_or(BackfillError::MissingBlock(number))?;
    Ok(Block::new(block.timestamp(), block.number()))
}

/// Posts backfill requests to the coordinator without blocking.
#[derive(Debug, Clone)]
pub struct BackfillRequester {
    sender: mpsc::Sender<u64>,
    metrics: QueryMetrics,
}

impl BackfillRequester {
    /// Returns a requester and the receiver to hand to [`BackfillCoordinator::run`].
    pub fn channel(metrics: QueryMetrics) -> (Self, mpsc::Receiver<u64>) {
        let (sender, receiver) = mpsc::channel(BACKFILL_REQUEST_CAPACITY);
        (Self { sender, metrics }, receiver)
    }

    /// Requests a backfill of the cache around the timestamp, in seconds. The request is dropped
    /// if the queue is full.
    pub fn request(&self, timestamp: u64) -> bool {
        self.metrics.backfill_requests.increment(1);
        match self.sender.try_send(timestamp) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(target: "guardian::backfill", timestamp, "backfill queue full, dropping request");
                self.metrics.backfill_requests_dropped.increment(1);
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(target: "guardian::backfill", timestamp, "backfill coordinator stopped, dropping request");
                false
            }
        }
    }
}

/// Seeds the [`TimestampCache`] at startup and fills its gaps on demand.
#[derive(Debug)]
pub struct BackfillCoordinator<C> {
    /// The chain connector.
    connector: Arc<C>,
    /// The cache to fill.
    cache: Arc<TimestampCache>,
    /// The largest batch accepted by the node.
    batch_size: u64,
    /// The query metrics.
    metrics: QueryMetrics,
}

impl<C: EvmConnector> BackfillCoordinator<C> {
    /// Discovers the batch size accepted by the node and seeds the cache with the blocks of the
    /// last [`BACKFILL_WINDOW`].
    pub async fn init(
        connector: Arc<C>,
        cache: Arc<TimestampCache>,
        metrics: QueryMetrics,
    ) -> Result<Self, BackfillError> {
        let latest = fetch_latest(connector.as_ref()).await?;
        let head = latest.block_number;

        let probed = connector.as_ref();
        let batch_size = find_max_batch_size(BACKFILL_MAX_BATCH_SIZE, |size| async move {
            fetch_blocks(probed, head.saturating_sub(size - 1)..=head).await.is_ok()
        })
        .await
        .ok_or(BackfillError::NoBatchSize)?;
        tracing::info!(target: "guardian::backfill", batch_size, "discovered backfill batch size");

        let cutoff = latest.timestamp.saturating_sub(BACKFILL_WINDOW.as_secs());
        let mut blocks = vec![latest];
        let mut end = head;
        while end > 0 && blocks.len() < BTS_MAX_BLOCKS {
            let start = end.saturating_sub(batch_size);
            let batch = fetch_blocks(connector.as_ref(), start..=end - 1).await?;
            let covered = batch.iter().any(|b| b.timestamp <= cutoff);
            blocks.extend(batch);
            if covered {
                break;
            }
            end = start;
        }

        tracing::info!(target: "guardian::backfill", count = blocks.len(), head, "seeding block cache");
        metrics.blocks_backfilled.increment(blocks.len() as u64);
        cache.add_batch(blocks);

        Ok(Self { connector, cache, batch_size, metrics })
    }

    /// Returns the batch size used by the coordinator.
    pub const fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Drains the backfill requests until cancelled or the channel is closed.
    pub async fn run(self, mut requests: mpsc::Receiver<u64>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = requests.recv() => {
                    let Some(timestamp) = request else { break };
                    self.handle_request(timestamp).await;
                }
            }
        }
        tracing::debug!(target: "guardian::backfill", "backfill coordinator stopped");
    }

    /// Fills the gap of the cache around the timestamp. Returns the number of blocks added.
    pub async fn handle_request(&self, timestamp: u64) -> usize {
        let look_up = self.cache.look_up(timestamp);
        if look_up.found || look_up.prev == 0 || look_up.next <= look_up.prev + 1 {
            tracing::debug!(target: "guardian::backfill", timestamp, ?look_up, "no gap to backfill");
            return 0;
        }

        let last = (look_up.next - 1).min(look_up.prev + self.batch_size);
        match fetch_blocks(self.connector.as_ref(), look_up.prev + 1..=last).await {
            Ok(blocks) => {
                let count = blocks.len();
                tracing::debug!(target: "guardian::backfill", timestamp, first = look_up.prev + 1, last, count, "backfilled block cache");
                self.metrics.blocks_backfilled.increment(count as u64);
                self.cache.add_batch(blocks);
                count
            }
            Err(err) => {
                tracing::warn!(target: "guardian::backfill", timestamp, %err, "failed to backfill block cache");
                0
            }
        }
    }
}
