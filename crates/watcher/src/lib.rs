//! EVM chain watcher for the guardian network.

pub mod backfill;
pub mod ccl;
pub mod ccq;

mod config;
pub use config::{CclConfig, CcqConfig, WatcherConfig, DEFAULT_QUERY_WORKERS};

mod connector;
pub use connector::{BatchCall, BlockMarshaller, EvmConnector, Finality, NewHeader, Receipt};

pub mod constants;

mod error;
pub use error::{
    ConnectorError, ConnectorResult, FilterLogError, ReobservationError, WatcherError,
    WatcherResult,
};

pub mod guardian_set;

mod heights;
pub use heights::{AtomicBlockHeights, BlockHeights};

mod metrics;
pub use metrics::{QueryMetrics, WatcherMetrics};

pub mod pending;

mod reobservation;

pub mod timestamp_cache;

#[cfg(any(test, feature = "test-utils"))]
/// Common test helpers
pub mod test_utils;

use crate::{
    backfill::{BackfillCoordinator, BackfillRequester},
    ccl::CclEngine,
    ccq::QueryExecutor,
    connector::with_timeout,
    constants::{BLOCK_TIME_RETRIES, BLOCK_TIME_RETRY_INTERVAL, BLOCK_TIME_TIMEOUT, RECEIPT_TIMEOUT},
    guardian_set::GuardianSetPoller,
    pending::{
        classify_receipt, OrphanReason, PendingKey, PendingObservation, PendingObservations,
        Readiness, ReceiptOutcome,
    },
    timestamp_cache::TimestampCache,
};

use alloy_primitives::{Address, B256};
use alloy_rpc_types_eth::Log;
use alloy_sol_types::SolEvent;
use guardian_evm_abi::logs::LogMessagePublished;
use guardian_primitives::{
    pad_address,
    query::{PerChainQueryRequest, PerChainQueryResponse},
    ConsistencyLevel, GuardianSet, MessagePublication, ObservationRequest,
};
use std::{future::Future, sync::Arc, time::Instant};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// The capacity of the internal error channel of the run loop.
const ERROR_CHANNEL_CAPACITY: usize = 4;

/// A `LogMessagePublished` event of the core contract, with the location it was emitted at.
#[derive(Debug, Clone)]
pub struct PublishedLog {
    /// The decoded event.
    pub event: LogMessagePublished,
    /// The hash of the emitting transaction.
    pub tx_hash: B256,
    /// The hash of the block the event was emitted in.
    pub block_hash: B256,
    /// The number of the block the event was emitted in.
    pub block_number: u64,
}

impl PublishedLog {
    /// Decodes a log of the core contract.
    pub fn from_log(log: &Log) -> Result<Self, FilterLogError> {
        let event = LogMessagePublished::decode_log(&log.inner)
            .map_err(|error| FilterLogError::DecodeLogFailed {
                log_type: "LogMessagePublished",
                error,
            })?
            .data;
        Ok(Self {
            event,
            tx_hash: log.transaction_hash.ok_or(FilterLogError::MissingTransactionHash)?,
            block_hash: log.block_hash.ok_or(FilterLogError::MissingBlockHash)?,
            block_number: log.block_number.ok_or(FilterLogError::MissingBlockNumber)?,
        })
    }
}

/// Returns true if the log was emitted by the contract with the `LogMessagePublished` topic.
fn is_message_log(log: &Log, contract: Address) -> bool {
    log.address() == contract && log.topic0() == Some(&LogMessagePublished::SIGNATURE_HASH)
}

/// The cross-chain query channels of a watcher.
#[derive(Debug)]
pub struct QueryChannels {
    /// The incoming query requests.
    pub requests: mpsc::Receiver<PerChainQueryRequest>,
    /// The outgoing query responses.
    pub responses: mpsc::Sender<PerChainQueryResponse>,
}

/// The channels driving a [`Watcher`] run loop.
#[derive(Debug)]
pub struct WatcherChannels {
    /// The new headers of the chain, for every finality.
    pub headers: mpsc::Receiver<ConnectorResult<NewHeader>>,
    /// The logs of the core contract.
    pub logs: mpsc::Receiver<ConnectorResult<Log>>,
    /// The reobservation requests.
    pub observation_requests: mpsc::Receiver<ObservationRequest>,
    /// The cross-chain query channels, if queries are served.
    pub queries: Option<QueryChannels>,
    /// The guardian set updates, if the guardian set should be tracked.
    pub guardian_sets: Option<mpsc::Sender<GuardianSet>>,
}

/// The watcher turns the core contract events of an EVM chain into confirmed
/// [`MessagePublication`]s.
///
/// New events are held as pending observations until their block reaches the consistency
/// level requested by the emitter. Every new header walks the pending observations and
/// publishes the confirmed ones, or drops those which were reorged out, failed or timed out.
#[derive(Debug)]
pub struct Watcher<C> {
    /// The chain connector.
    connector: Arc<C>,
    /// The watcher configuration.
    config: Arc<WatcherConfig>,
    /// The latest, safe and finalized heights.
    heights: Arc<AtomicBlockHeights>,
    /// The observations waiting for confirmation.
    pending: Mutex<PendingObservations>,
    /// The custom consistency level engine.
    ccl: CclEngine<C>,
    /// The block timestamp cache, if queries by timestamp are supported.
    timestamp_cache: Option<Arc<TimestampCache>>,
    /// The sender part of the channel for confirmed messages.
    messages: mpsc::Sender<MessagePublication>,
    /// The metrics for the watcher.
    metrics: WatcherMetrics,
    /// Cancelled when the run loop stops, ending the detached block time retries.
    shutdown: CancellationToken,
}

impl<C: EvmConnector + 'static> Watcher<C> {
    /// Returns a new [`Watcher`] publishing the confirmed messages on `messages`.
    pub fn new(
        connector: Arc<C>,
        config: WatcherConfig,
        messages: mpsc::Sender<MessagePublication>,
    ) -> Self {
        let metrics = WatcherMetrics::default();
        let ccl = CclEngine::new(connector.clone(), config.ccl_contract(), metrics.clone());
        let timestamp_cache =
            config.ccq.timestamp_cache_supported.then(|| Arc::new(TimestampCache::default()));
        tracing::info!(
            target: "guardian::watcher",
            network = %config.network_name,
            chain_id = %config.chain_id,
            environment = %config.environment,
            contract = %config.contract_address,
            ccl_enabled = ccl.is_enabled(),
            "creating watcher"
        );

        Self {
            connector,
            config: Arc::new(config),
            heights: Arc::new(AtomicBlockHeights::default()),
            pending: Mutex::new(PendingObservations::default()),
            ccl,
            timestamp_cache,
            messages,
            metrics,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns the block heights tracked by the watcher.
    pub fn heights(&self) -> Arc<AtomicBlockHeights> {
        self.heights.clone()
    }

    /// Returns the block timestamp cache, if any.
    pub fn timestamp_cache(&self) -> Option<Arc<TimestampCache>> {
        self.timestamp_cache.clone()
    }

    /// Returns the number of pending observations.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Runs the watcher until cancelled or an unrecoverable error occurs.
    ///
    /// A failed or closed header or log subscription terminates the run loop with an error.
    pub async fn run(
        self: Arc<Self>,
        channels: WatcherChannels,
        cancel: CancellationToken,
    ) -> WatcherResult<()> {
        let cancel = cancel.child_token();
        let (errors_tx, mut errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let WatcherChannels { headers, logs, observation_requests, queries, guardian_sets } =
            channels;

        let mut tasks = Vec::new();
        let watcher = self.clone();
        tasks.push(spawn_subscription(
            "headers",
            headers,
            move |header| {
                let watcher = watcher.clone();
                async move { watcher.handle_new_header(header).await }
            },
            cancel.clone(),
            errors_tx.clone(),
        ));
        let watcher = self.clone();
        tasks.push(spawn_subscription(
            "logs",
            logs,
            move |log| {
                let watcher = watcher.clone();
                async move { watcher.handle_log(log).await }
            },
            cancel.clone(),
            errors_tx.clone(),
        ));
        tasks.push(self.clone().spawn_reobservations(
            observation_requests,
            cancel.clone(),
            errors_tx.clone(),
        ));

        if let Some(QueryChannels { requests, responses }) = queries {
            let executor = self.query_executor(responses, &mut tasks, cancel.clone());
            tasks.extend(Arc::new(executor).spawn_workers(
                self.config.ccq.num_workers,
                requests,
                cancel.clone(),
            ));
        }

        if let Some(sender) = guardian_sets {
            let poller = GuardianSetPoller::new(
                self.connector.clone(),
                self.config.contract_address,
                sender,
                self.metrics.clone(),
            );
            tasks.push(tokio::spawn(poller.run(cancel.clone())));
        }
        drop(errors_tx);

        tracing::info!(target: "guardian::watcher", network = %self.config.network_name, "watcher running");
        let result = tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            err = errors_rx.recv() => err.map_or(Ok(()), Err),
        };
        if let Err(err) = &result {
            tracing::error!(target: "guardian::watcher", network = %self.config.network_name, %err, "watcher stopped on error");
        }

        cancel.cancel();
        self.shutdown.cancel();
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(target: "guardian::watcher", %err, "watcher task panicked");
            }
        }
        result
    }

    /// Builds the query executor, spawning the backfill coordinator of the block cache if
    /// enabled.
    fn query_executor(
        &self,
        responses: mpsc::Sender<PerChainQueryResponse>,
        tasks: &mut Vec<JoinHandle<()>>,
        cancel: CancellationToken,
    ) -> QueryExecutor<C> {
        let metrics = QueryMetrics::default();
        let executor = QueryExecutor::new(
            self.connector.clone(),
            self.config.chain_id,
            self.heights.clone(),
            responses,
            metrics.clone(),
        )
        .with_max_block_number(self.config.ccq.max_block_number);

        let Some(cache) = self.timestamp_cache.clone() else { return executor };
        if !self.config.ccq.backfill_cache {
            return executor.with_timestamp_cache(cache, None);
        }

        let (requester, requests) = BackfillRequester::channel(metrics.clone());
        let connector = self.connector.clone();
        let backfilled = cache.clone();
        tasks.push(tokio::spawn(async move {
            match BackfillCoordinator::init(connector, backfilled, metrics).await {
                Ok(coordinator) => coordinator.run(requests, cancel).await,
                Err(err) => {
                    tracing::error!(target: "guardian::backfill", %err, "failed to initialize block cache")
                }
            }
        }));
        executor.with_timestamp_cache(cache, Some(requester))
    }

    fn spawn_reobservations(
        self: Arc<Self>,
        mut requests: mpsc::Receiver<ObservationRequest>,
        cancel: CancellationToken,
        errors: mpsc::Sender<WatcherError>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    _ = cancel.cancelled() => break,
                    request = requests.recv() => request,
                };
                let Some(request) = request else { break };

                let tx_hash = request.tx_hash.clone();
                match self.handle_reobservation_request(request.chain_id, &request.tx_hash).await {
                    Ok(count) => {
                        tracing::info!(target: "guardian::watcher", %tx_hash, count, "reobserved transaction")
                    }
                    Err(err @ WatcherError::MessageChannelClosed(_)) => {
                        let _ = errors.send(err).await;
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(target: "guardian::watcher", %tx_hash, %err, "failed to reobserve transaction")
                    }
                }
            }
        })
    }

    /// Handles a new header: updates the tracked heights and walks the pending observations.
    #[tracing::instrument(target = "guardian::watcher", skip_all, fields(number = header.number, finality = ?header.finality))]
    pub async fn handle_new_header(&self, header: NewHeader) -> WatcherResult<()> {
        match header.finality {
            Finality::Latest => {
                self.heights.set_latest(header.number);
                self.metrics.latest_height.set(header.number as f64);
                if let Some(cache) = &self.timestamp_cache {
                    cache.add_latest(header.time, header.number);
                }
            }
            Finality::Safe => {
                self.heights.set_safe(header.number);
                self.metrics.safe_height.set(header.number as f64);
            }
            Finality::Finalized => {
                self.heights.set_finalized(header.number);
                self.metrics.finalized_height.set(header.number as f64);
            }
        }
        tracing::trace!(target: "guardian::watcher", hash = %header.hash, "processing header");

        self.process_pending().await
    }

    /// Walks the pending observations against the current heights.
    async fn process_pending(&self) -> WatcherResult<()> {
        let mut pending = self.pending.lock().await;
        let heights = self.heights.snapshot();

        for key in pending.keys() {
            let Some(observation) = pending.get(&key).cloned() else { continue };
            let msg_id = observation.message.message_id();

            match observation.readiness(self.config.min_confirmations, heights) {
                Readiness::Waiting => continue,
                Readiness::TimedOut => {
                    pending.remove(&key);
                    self.orphan(&key, &msg_id, OrphanReason::Timeout);
                    continue;
                }
                Readiness::Ready => {}
            }

            let start = Instant::now();
            let receipt =
                with_timeout(RECEIPT_TIMEOUT, self.connector.transaction_receipt(key.tx_hash))
                    .await;
            self.metrics.receipt_duration.record(start.elapsed().as_secs_f64());

            match classify_receipt(&receipt, key.block_hash) {
                ReceiptOutcome::Confirmed => {
                    pending.remove(&key);
                    let level = observation.consistency_level();
                    tracing::info!(target: "guardian::watcher", tx_hash = ?key.tx_hash, %msg_id, %level, height = observation.height, "observation confirmed");
                    self.publish(observation.message).await?;
                }
                ReceiptOutcome::Orphaned(reason) => {
                    pending.remove(&key);
                    self.orphan(&key, &msg_id, reason);
                }
                ReceiptOutcome::Retry => {
                    if observation.retries_exhausted(heights) {
                        pending.remove(&key);
                        self.orphan(&key, &msg_id, OrphanReason::Timeout);
                        continue;
                    }
                    self.metrics.connection_errors.increment(1);
                    if let Err(err) = &receipt {
                        tracing::warn!(target: "guardian::watcher", tx_hash = ?key.tx_hash, %msg_id, %err, "failed to fetch receipt, retrying on next header");
                    }
                }
            }
        }

        self.metrics.pending_observations.set(pending.len() as f64);
        Ok(())
    }

    fn orphan(&self, key: &PendingKey, msg_id: &str, reason: OrphanReason) {
        tracing::info!(target: "guardian::watcher", tx_hash = ?key.tx_hash, block_hash = ?key.block_hash, %msg_id, %reason, "dropping observation");
        self.metrics.orphaned(reason);
    }

    /// Handles a log of the core contract subscription.
    ///
    /// Logs from another contract or with another topic are ignored. A block time which cannot
    /// be read yet is retried in the background, any other failure is returned.
    pub async fn handle_log(self: &Arc<Self>, log: Log) -> WatcherResult<()> {
        if log.removed {
            tracing::debug!(target: "guardian::watcher", tx_hash = ?log.transaction_hash, "ignoring removed log");
            return Ok(());
        }
        if !is_message_log(&log, self.config.contract_address) {
            tracing::trace!(target: "guardian::watcher", address = %log.address(), "ignoring unrelated log");
            return Ok(());
        }

        let published = PublishedLog::from_log(&log)?;
        match self.block_time(published.block_hash).await {
            Ok(timestamp) => self.observe(published, timestamp).await,
            Err(err) if err.is_retryable_block_time() => {
                tracing::warn!(target: "guardian::watcher", tx_hash = ?published.tx_hash, block_hash = ?published.block_hash, %err, "block time not available yet, retrying");
                let watcher = self.clone();
                tokio::spawn(async move { watcher.retry_block_time(published).await });
                Ok(())
            }
            Err(err) => {
                self.metrics.connection_errors.increment(1);
                Err(err.into())
            }
        }
    }

    async fn retry_block_time(&self, published: PublishedLog) {
        for attempt in 1..=BLOCK_TIME_RETRIES {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::debug!(target: "guardian::watcher", tx_hash = ?published.tx_hash, "watcher stopped, abandoning block time retry");
                    return;
                }
                _ = tokio::time::sleep(BLOCK_TIME_RETRY_INTERVAL) => {}
            }
            match self.block_time(published.block_hash).await {
                Ok(timestamp) => {
                    if let Err(err) = self.observe(published, timestamp).await {
                        tracing::error!(target: "guardian::watcher", %err, "failed to observe message after block time retry");
                    }
                    return;
                }
                Err(err) => {
                    tracing::debug!(target: "guardian::watcher", tx_hash = ?published.tx_hash, attempt, %err, "block time retry failed")
                }
            }
        }
        self.metrics.connection_errors.increment(1);
        tracing::error!(target: "guardian::watcher", tx_hash = ?published.tx_hash, block_hash = ?published.block_hash, "giving up on block time, message not observed");
    }

    async fn block_time(&self, block_hash: B256) -> ConnectorResult<u64> {
        with_timeout(BLOCK_TIME_TIMEOUT, self.connector.time_of_block_by_hash(block_hash)).await
    }

    /// Builds the message of the event, resolving custom consistency levels. Returns the message
    /// and the number of blocks to wait past its consistency level.
    async fn message(
        &self,
        published: &PublishedLog,
        timestamp: u64,
        is_reobservation: bool,
    ) -> (MessagePublication, u64) {
        let event = &published.event;
        let mut message = MessagePublication {
            tx_id: published.tx_hash,
            timestamp,
            nonce: event.nonce,
            sequence: event.sequence,
            emitter_chain: self.config.chain_id,
            emitter_address: pad_address(event.sender),
            payload: event.payload.clone(),
            consistency_level: event.consistencyLevel,
            is_reobservation,
        };

        let mut additional_blocks = 0;
        if ConsistencyLevel::from(event.consistencyLevel) == ConsistencyLevel::Custom {
            let resolution = self.ccl.resolve(event.sender).await;
            message.consistency_level = resolution.consistency_level.into();
            additional_blocks = resolution.additional_blocks;
        }
        (message, additional_blocks)
    }

    /// Publishes the message right away if requested, holds it as a pending observation
    /// otherwise.
    async fn observe(&self, published: PublishedLog, timestamp: u64) -> WatcherResult<()> {
        let (message, additional_blocks) = self.message(&published, timestamp, false).await;
        let level = ConsistencyLevel::from(message.consistency_level);
        let msg_id = message.message_id();
        self.metrics.messages_observed.increment(1);
        tracing::info!(target: "guardian::watcher", tx_hash = ?published.tx_hash, block_hash = ?published.block_hash, block_number = published.block_number, %msg_id, %level, additional_blocks, "found new message publication");

        if level == ConsistencyLevel::PublishImmediately && additional_blocks == 0 {
            return self.publish(message).await;
        }

        let key = PendingKey::new(&message, published.block_hash);
        let observation =
            PendingObservation { message, height: published.block_number, additional_blocks };
        let mut pending = self.pending.lock().await;
        if !pending.insert(key, observation) {
            tracing::debug!(target: "guardian::watcher", tx_hash = ?published.tx_hash, %msg_id, "message already pending");
        }
        self.metrics.pending_observations.set(pending.len() as f64);
        Ok(())
    }

    /// Publishes a confirmed message.
    async fn publish(&self, message: MessagePublication) -> WatcherResult<()> {
        if message.is_reobservation {
            self.metrics.messages_reobserved.increment(1);
        } else {
            self.metrics.messages_confirmed.increment(1);
        }
        self.messages.send(message).await?;
        Ok(())
    }
}

/// Spawns a task feeding the items of a subscription to `handler`. A failing handler, an error
/// item or a closed subscription is reported on `errors`.
fn spawn_subscription<T, F, Fut>(
    name: &'static str,
    mut subscription: mpsc::Receiver<ConnectorResult<T>>,
    handler: F,
    cancel: CancellationToken,
    errors: mpsc::Sender<WatcherError>,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + 'static,
    Fut: Future<Output = WatcherResult<()>> + Send,
{
    tokio::spawn(async move {
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => break,
                item = subscription.recv() => item,
            };
            let result = match item {
                Some(Ok(item)) => handler(item).await,
                Some(Err(source)) => Err(WatcherError::Subscription { subscription: name, source }),
                None => Err(WatcherError::Subscription {
                    subscription: name,
                    source: ConnectorError::Closed,
                }),
            };
            if let Err(err) = result {
                let _ = errors.send(err).await;
                break;
            }
        }
        tracing::debug!(target: "guardian::watcher", subscription = name, "subscription task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{arbitrary::Arbitrary, connector::MockConnector, message_log};

    use alloy_primitives::Bytes;

    const CORE: Address = Address::repeat_byte(0x11);
    const EMITTER: Address = Address::repeat_byte(0x22);

    fn watcher(
        connector: Arc<MockConnector>,
    ) -> (Arc<Watcher<MockConnector>>, mpsc::Receiver<MessagePublication>) {
        let (tx, rx) = mpsc::channel(16);
        let config = WatcherConfig::new(guardian_primitives::ChainId::ETHEREUM, "eth", CORE);
        (Arc::new(Watcher::new(connector, config, tx)), rx)
    }

    fn event(consistency_level: u8) -> LogMessagePublished {
        LogMessagePublished {
            sender: EMITTER,
            sequence: 1,
            nonce: 0,
            payload: Bytes::from_static(b"payload"),
            consistencyLevel: consistency_level,
        }
    }

    async fn latest(watcher: &Watcher<MockConnector>, number: u64) -> WatcherResult<()> {
        watcher
            .handle_new_header(NewHeader {
                number,
                hash: MockConnector::block_hash(number),
                time: number * 12,
                finality: Finality::Latest,
            })
            .await
    }

    #[test]
    fn test_should_decode_published_logs() -> eyre::Result<()> {
        for _ in 0..20 {
            let event = crate::random!(LogMessagePublished);
            let tx_hash = crate::random!(B256);
            let log = message_log(CORE, tx_hash, 42, &event);

            let published = PublishedLog::from_log(&log)?;

            assert_eq!(published.event.sender, event.sender);
            assert_eq!(published.event.sequence, event.sequence);
            assert_eq!(published.event.payload, event.payload);
            assert_eq!(published.event.consistencyLevel, event.consistencyLevel);
            assert_eq!(
                (published.tx_hash, published.block_hash, published.block_number),
                (tx_hash, MockConnector::block_hash(42), 42)
            );
        }

        let mut log = message_log(CORE, B256::ZERO, 42, &event(1));
        log.transaction_hash = None;
        assert!(matches!(
            PublishedLog::from_log(&log),
            Err(FilterLogError::MissingTransactionHash)
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_should_ignore_unrelated_logs() -> eyre::Result<()> {
        // Given
        let connector = Arc::new(MockConnector::default());
        connector.add_chain(0..=10, |n| n * 12);
        let (watcher, _rx) = watcher(connector);
        let tx_hash = B256::repeat_byte(1);

        let mut other_contract = message_log(Address::repeat_byte(0x33), tx_hash, 5, &event(1));
        let mut removed = message_log(CORE, tx_hash, 5, &event(1));
        removed.removed = true;
        let mut other_topic = message_log(CORE, tx_hash, 5, &event(1));
        other_topic.inner.data = alloy_primitives::LogData::new_unchecked(
            vec![B256::repeat_byte(0xff)],
            Bytes::new(),
        );

        // When
        for log in [other_contract.clone(), removed, other_topic] {
            watcher.handle_log(log).await?;
        }
        other_contract.inner.address = CORE;

        // Then
        assert_eq!(watcher.pending_count().await, 0);
        watcher.handle_log(other_contract).await?;
        assert_eq!(watcher.pending_count().await, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_should_publish_immediately() -> eyre::Result<()> {
        // Given
        let connector = Arc::new(MockConnector::default());
        connector.add_chain(0..=10, |n| n * 12);
        let (watcher, mut rx) = watcher(connector);
        let log = message_log(CORE, B256::repeat_byte(1), 5, &event(200));

        // When
        watcher.handle_log(log).await?;

        // Then
        let message = rx.try_recv()?;
        assert_eq!(message.timestamp, 60);
        assert_eq!(message.emitter_address, pad_address(EMITTER));
        assert_eq!(message.consistency_level, 200);
        assert!(!message.is_reobservation);
        assert_eq!(watcher.pending_count().await, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_should_keep_single_entry_per_key() -> eyre::Result<()> {
        // Given
        let connector = Arc::new(MockConnector::default());
        connector.add_chain(0..=10, |n| n * 12);
        let (watcher, _rx) = watcher(connector);
        let log = message_log(CORE, B256::repeat_byte(1), 5, &event(10));

        // When
        watcher.handle_log(log.clone()).await?;
        watcher.handle_log(log).await?;

        // Then
        assert_eq!(watcher.pending_count().await, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_should_retry_block_time() -> eyre::Result<()> {
        // Given
        let connector = Arc::new(MockConnector::default());
        let (watcher, mut rx) = watcher(connector.clone());
        let log = message_log(CORE, B256::repeat_byte(1), 5, &event(200));

        // When
        watcher.handle_log(log).await?;
        assert!(rx.try_recv().is_err());
        connector.add_chain(0..=10, |n| n * 12);

        // Then
        let message = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv()).await?;
        assert_eq!(message.map(|m| m.timestamp), Some(60));

        Ok(())
    }

    #[tokio::test]
    async fn test_should_abandon_block_time_retry_on_shutdown() -> eyre::Result<()> {
        // Given
        let connector = Arc::new(MockConnector::default());
        let (watcher, mut rx) = watcher(connector.clone());
        let log = message_log(CORE, B256::repeat_byte(1), 5, &event(200));
        watcher.handle_log(log).await?;

        // When
        watcher.shutdown.cancel();
        connector.add_chain(0..=10, |n| n * 12);

        // Then
        let message = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await;
        assert!(message.is_err());
        assert_eq!(watcher.pending_count().await, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_should_fail_on_block_time_error() {
        let connector = Arc::new(MockConnector::default());
        connector.fail_block_times("connection refused");
        let (watcher, _rx) = watcher(connector);
        let log = message_log(CORE, B256::repeat_byte(1), 5, &event(200));

        assert!(matches!(watcher.handle_log(log).await, Err(WatcherError::Connector(_))));
    }

    #[tokio::test]
    async fn test_should_confirm_after_confirmations() -> eyre::Result<()> {
        // Given
        let connector = Arc::new(MockConnector::default());
        connector.add_chain(0..=20, |n| n * 12);
        let tx_hash = B256::repeat_byte(1);
        connector.add_receipt(tx_hash, 5, true);
        let (watcher, mut rx) = watcher(connector);
        watcher.handle_log(message_log(CORE, tx_hash, 5, &event(3))).await?;

        // When
        latest(&watcher, 7).await?;
        assert!(rx.try_recv().is_err());
        latest(&watcher, 8).await?;

        // Then
        assert_eq!(rx.try_recv()?.tx_id, tx_hash);
        assert_eq!(watcher.pending_count().await, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_should_track_heights_and_cache() -> eyre::Result<()> {
        let connector = Arc::new(MockConnector::default());
        let (tx, _rx) = mpsc::channel(1);
        let mut config = WatcherConfig::new(guardian_primitives::ChainId::ETHEREUM, "eth", CORE);
        config.ccq.timestamp_cache_supported = true;
        let watcher = Watcher::new(connector, config, tx);

        latest(&watcher, 10).await?;
        watcher
            .handle_new_header(NewHeader {
                number: 8,
                hash: B256::ZERO,
                time: 96,
                finality: Finality::Safe,
            })
            .await?;
        watcher
            .handle_new_header(NewHeader {
                number: 4,
                hash: B256::ZERO,
                time: 48,
                finality: Finality::Finalized,
            })
            .await?;

        assert_eq!(
            watcher.heights().snapshot(),
            BlockHeights { latest: 10, safe: 8, finalized: 4 }
        );
        assert_eq!(watcher.timestamp_cache().map(|cache| cache.len()), Some(1));

        latest(&watcher, 11).await?;
        let cache = watcher.timestamp_cache().expect("cache enabled");
        assert_eq!(cache.len(), 2);
        let look_up = cache.look_up(125);
        assert_eq!((look_up.prev, look_up.next, look_up.found), (10, 11, true));
        let look_up = cache.look_up(132);
        assert_eq!((look_up.prev, look_up.next, look_up.found), (11, 0, false));

        Ok(())
    }
}
