//! Executes the cross-chain queries routed to the watcher.

mod batch;

mod block_id;
pub use block_id::{BlockIdError, BlockRequest};

mod error;
pub use error::QueryError;

use crate::{
    backfill::BackfillRequester,
    connector::{with_timeout, BatchCall, BlockMarshaller},
    constants::{MICROS_PER_SECOND, QUERY_TIMEOUT},
    heights::AtomicBlockHeights,
    metrics::QueryMetrics,
    timestamp_cache::TimestampCache,
    EvmConnector,
};

use alloy_primitives::Bytes;
use guardian_primitives::{
    query::{
        ChainSpecificQuery, ChainSpecificResponse, EthCallByTimestampQueryRequest,
        EthCallByTimestampQueryResponse, EthCallData, EthCallQueryRequest, EthCallQueryResponse,
        EthCallWithFinalityQueryRequest, PerChainQueryRequest, PerChainQueryResponse, QueryStatus,
    },
    ChainId,
};
use std::{sync::Arc, time::Instant};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        Mutex,
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// Answers the queries for a single chain and delivers the responses on a bounded channel.
#[derive(Debug)]
pub struct QueryExecutor<C> {
    connector: Arc<C>,
    chain_id: ChainId,
    heights: Arc<AtomicBlockHeights>,
    timestamp_cache: Option<Arc<TimestampCache>>,
    backfill: Option<BackfillRequester>,
    max_block_number: u64,
    responses: mpsc::Sender<PerChainQueryResponse>,
    metrics: QueryMetrics,
}

impl<C: EvmConnector + 'static> QueryExecutor<C> {
    /// Returns a new [`QueryExecutor`] without block cache nor block number limit.
    pub fn new(
        connector: Arc<C>,
        chain_id: ChainId,
        heights: Arc<AtomicBlockHeights>,
        responses: mpsc::Sender<PerChainQueryResponse>,
        metrics: QueryMetrics,
    ) -> Self {
        Self {
            connector,
            chain_id,
            heights,
            timestamp_cache: None,
            backfill: None,
            max_block_number: u64::MAX,
            responses,
            metrics,
        }
    }

    /// Resolves the queries by timestamp without hints through the cache. Cache gaps are
    /// reported to the backfill requester if any.
    pub fn with_timestamp_cache(
        mut self,
        cache: Arc<TimestampCache>,
        backfill: Option<BackfillRequester>,
    ) -> Self {
        self.timestamp_cache = Some(cache);
        self.backfill = backfill;
        self
    }

    /// Answers queries resolving any block above `max_block_number` with a retry.
    pub const fn with_max_block_number(mut self, max_block_number: u64) -> Self {
        self.max_block_number = max_block_number;
        self
    }

    /// Spawns `num_workers` tasks answering the requests until cancelled or the channel is
    /// closed.
    pub fn spawn_workers(
        self: Arc<Self>,
        num_workers: usize,
        requests: mpsc::Receiver<PerChainQueryRequest>,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let requests = Arc::new(Mutex::new(requests));
        (0..num_workers.max(1))
            .map(|worker| {
                let executor = self.clone();
                let requests = requests.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        let request = tokio::select! {
                            _ = cancel.cancelled() => break,
                            request = async { requests.lock().await.recv().await } => request,
                        };
                        let Some(request) = request else { break };
                        executor.handle_query(request).await;
                    }
                    tracing::debug!(target: "guardian::ccq", worker, "query worker stopped");
                })
            })
            .collect()
    }

    /// Answers the request and delivers the response. Returns the status of the response.
    #[tracing::instrument(target = "guardian::ccq", skip_all, fields(request_id = %request.request_id, request_idx = request.request_idx, query_type = request.query.query_type()))]
    pub async fn handle_query(&self, request: PerChainQueryRequest) -> QueryStatus {
        self.metrics.queries.increment(1);
        let start = Instant::now();

        let result = if request.chain_id == self.chain_id {
            match &request.query {
                ChainSpecificQuery::EthCall(query) => {
                    self.eth_call(query).await.map(ChainSpecificResponse::EthCall)
                }
                ChainSpecificQuery::EthCallByTimestamp(query) => self
                    .eth_call_by_timestamp(query)
                    .await
                    .map(ChainSpecificResponse::EthCallByTimestamp),
                ChainSpecificQuery::EthCallWithFinality(query) => self
                    .eth_call_with_finality(query)
                    .await
                    .map(ChainSpecificResponse::EthCallWithFinality),
                ChainSpecificQuery::Unsupported { query_type } => {
                    Err(QueryError::UnsupportedQueryType(*query_type))
                }
            }
        } else {
            Err(QueryError::WrongChain {
                got: request.chain_id.as_u16(),
                expected: self.chain_id.as_u16(),
            })
        };
        self.metrics.query_duration.record(start.elapsed().as_secs_f64());

        let response = match result {
            Ok(response) => {
                self.metrics.success.increment(1);
                tracing::debug!(target: "guardian::ccq", "query succeeded");
                PerChainQueryResponse::new(&request, QueryStatus::Success, Some(response))
            }
            Err(err) => {
                let status = err.status();
                if status == QueryStatus::RetryNeeded {
                    self.metrics.retry_needed.increment(1);
                    tracing::warn!(target: "guardian::ccq", %err, "query failed, retry needed");
                } else {
                    self.metrics.fatal_errors.increment(1);
                    tracing::error!(target: "guardian::ccq", %err, "query failed");
                }
                PerChainQueryResponse::new(&request, status, None)
            }
        };

        let status = response.status;
        self.respond(response);
        status
    }

    fn respond(&self, response: PerChainQueryResponse) {
        match self.responses.try_send(response) {
            Ok(()) => {}
            Err(TrySendError::Full(response)) => {
                self.metrics.responses_dropped.increment(1);
                tracing::error!(target: "guardian::ccq", request_id = %response.request_id, "query response channel full, dropping response");
            }
            Err(TrySendError::Closed(response)) => {
                tracing::warn!(target: "guardian::ccq", request_id = %response.request_id, "query response channel closed");
            }
        }
    }

    /// Executes the calls at a block.
    pub async fn eth_call(
        &self,
        query: &EthCallQueryRequest,
    ) -> Result<EthCallQueryResponse, QueryError> {
        let block = BlockRequest::parse(&query.block_id)?;
        let ([block], results) =
            self.execute([&block], ["block"], &query.call_data, &block).await?;
        Ok(query_response(&block, results))
    }

    /// Executes the calls at the block that was the head at the target timestamp.
    pub async fn eth_call_by_timestamp(
        &self,
        query: &EthCallByTimestampQueryRequest,
    ) -> Result<EthCallByTimestampQueryResponse, QueryError> {
        let (target, following) =
            match (query.target_block_id_hint.is_empty(), query.following_block_id_hint.is_empty())
            {
                (false, false) => (
                    BlockRequest::parse(&query.target_block_id_hint)?,
                    BlockRequest::parse(&query.following_block_id_hint)?,
                ),
                (true, true) => self.blocks_at(query.target_timestamp)?,
                _ => return Err(QueryError::InconsistentHints),
            };

        let ([target, following], results) = self
            .execute([&target, &following], ["target", "following"], &query.call_data, &target)
            .await?;

        if target.number() + 1 != following.number() {
            return Err(QueryError::NotAdjacent {
                target: target.number(),
                following: following.number(),
            });
        }

        let target_time = target.timestamp() * MICROS_PER_SECOND;
        let following_time = following.timestamp() * MICROS_PER_SECOND;
        if query.target_timestamp < target_time || query.target_timestamp >= following_time {
            return Err(QueryError::TimestampOutOfRange {
                timestamp: query.target_timestamp,
                target_time,
                following_time,
            });
        }

        Ok(EthCallByTimestampQueryResponse {
            target_block_number: target.number(),
            target_block_hash: target.hash,
            target_block_time: target_time,
            following_block_number: following.number(),
            following_block_hash: following.hash,
            following_block_time: following_time,
            results,
        })
    }

    /// Executes the calls at a block which must have reached the requested finality.
    pub async fn eth_call_with_finality(
        &self,
        query: &EthCallWithFinalityQueryRequest,
    ) -> Result<EthCallQueryResponse, QueryError> {
        let finality: &'static str = match query.finality.as_str() {
            "finalized" => "finalized",
            "safe" => "safe",
            other => return Err(QueryError::InvalidFinality(other.to_owned())),
        };
        let block = BlockRequest::parse(&query.block_id)?;
        let ([block], results) =
            self.execute([&block], ["block"], &query.call_data, &block).await?;

        let latest =
            if finality == "finalized" { self.heights.finalized() } else { self.heights.safe() };
        if block.number() > latest {
            return Err(QueryError::NotFinal { number: block.number(), finality, latest });
        }

        Ok(query_response(&block, results))
    }

    /// Resolves the target and following blocks of the timestamp, in microseconds, through the
    /// block cache.
    fn blocks_at(&self, timestamp: u64) -> Result<(BlockRequest, BlockRequest), QueryError> {
        let cache = self.timestamp_cache.as_ref().ok_or(QueryError::CacheUnsupported)?;
        let seconds = timestamp / MICROS_PER_SECOND;

        let (first, last) = cache.range().ok_or(QueryError::CacheEmpty)?;
        if seconds < first.timestamp {
            return Err(QueryError::TimestampTooOld(seconds));
        }
        if seconds >= last.timestamp {
            return Err(QueryError::TimestampTooRecent(seconds));
        }

        let look_up = cache.look_up(seconds);
        if !look_up.found {
            let backfill_requested =
                self.backfill.as_ref().is_some_and(|backfill| backfill.request(seconds));
            return Err(QueryError::CacheGap {
                timestamp: seconds,
                prev: look_up.prev,
                next: look_up.next,
                backfill_requested,
            });
        }

        tracing::debug!(target: "guardian::ccq", seconds, prev = look_up.prev, next = look_up.next, "resolved blocks through the cache");
        Ok((
            BlockRequest::Number(format!("0x{:x}", look_up.prev)),
            BlockRequest::Number(format!("0x{:x}", look_up.next)),
        ))
    }

    /// Executes a batch looking the blocks up and executing the calls at `call_block`.
    async fn execute<const N: usize>(
        &self,
        blocks: [&BlockRequest; N],
        labels: [&'static str; N],
        call_data: &[EthCallData],
        call_block: &BlockRequest,
    ) -> Result<([BlockMarshaller; N], Vec<Bytes>), QueryError> {
        let block_arg = call_block.call_block_arg();
        let calls = blocks
            .iter()
            .map(|block| block.block_call())
            .chain(call_data.iter().map(|call| batch::eth_call(call, &block_arg)))
            .collect::<Vec<BatchCall>>();

        let mut results =
            with_timeout(QUERY_TIMEOUT, self.connector.raw_batch_call(calls)).await?.into_iter();

        let mut parsed = Vec::with_capacity(N);
        for label in labels {
            parsed.push(batch::parse_block(label, results.next())?);
        }
        let blocks = <[BlockMarshaller; N]>::try_from(parsed).map_err(|_| {
            QueryError::InvalidBlock { label: "block", reason: "missing lookup".into() }
        })?;
        if let Some(block) = blocks.iter().find(|block| block.number() > self.max_block_number) {
            return Err(QueryError::BlockNumberTooHigh {
                number: block.number(),
                max: self.max_block_number,
            });
        }

        let results = batch::parse_call_results(results)?;
        if results.len() != call_data.len() {
            return Err(QueryError::Call {
                index: results.len(),
                reason: "missing call result".into(),
            });
        }

        Ok((blocks, results))
    }
}

fn query_response(block: &BlockMarshaller, results: Vec<Bytes>) -> EthCallQueryResponse {
    EthCallQueryResponse {
        block_number: block.number(),
        hash: block.hash,
        time: block.timestamp() * MICROS_PER_SECOND,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_utils::connector::MockConnector, timestamp_cache::Block};
    use alloy_primitives::{address, bytes, Address};

    const TOKEN: Address = address!("0x0000000000000000000000000000000000000004");

    fn decimals() -> EthCallData {
        EthCallData { to: TOKEN, data: bytes!("0x313ce567") }
    }

    type Executor = (
        QueryExecutor<MockConnector>,
        Arc<AtomicBlockHeights>,
        mpsc::Receiver<PerChainQueryResponse>,
    );

    fn new_executor(connector: Arc<MockConnector>) -> Executor {
        let heights = Arc::new(AtomicBlockHeights::default());
        let (tx, rx) = mpsc::channel(8);
        let executor = QueryExecutor::new(
            connector,
            ChainId::ETHEREUM,
            heights.clone(),
            tx,
            QueryMetrics::default(),
        );
        (executor, heights, rx)
    }

    fn connector() -> Arc<MockConnector> {
        let connector = Arc::new(MockConnector::default());
        connector.add_chain(0..=200, |n| 1_000 + n * 12);
        connector.set_eth_call_result(TOKEN, bytes!("0x313ce567"), Bytes::from(vec![18u8; 32]));
        connector
    }

    fn request(query: ChainSpecificQuery) -> PerChainQueryRequest {
        PerChainQueryRequest {
            request_id: "request".into(),
            request_idx: 0,
            chain_id: ChainId::ETHEREUM,
            query,
        }
    }

    #[tokio::test]
    async fn test_should_call_at_block_number() -> eyre::Result<()> {
        // Given
        let (executor, _, mut responses) = new_executor(connector());
        let query = EthCallQueryRequest { block_id: "0x64".into(), call_data: vec![decimals()] };

        // When
        let status = executor.handle_query(request(ChainSpecificQuery::EthCall(query))).await;

        // Then
        assert_eq!(status, QueryStatus::Success);
        let response = responses.recv().await.expect("response");
        let Some(ChainSpecificResponse::EthCall(response)) = response.response else {
            eyre::bail!("unexpected response {response:?}")
        };
        assert_eq!(response.block_number, 100);
        assert_eq!(response.hash, MockConnector::block_hash(100));
        assert_eq!(response.time, 2_200 * MICROS_PER_SECOND);
        assert_eq!(response.results, vec![Bytes::from(vec![18u8; 32])]);

        Ok(())
    }

    #[tokio::test]
    async fn test_should_call_at_block_hash() -> eyre::Result<()> {
        // Given
        let connector = connector();
        let (executor, _, _responses) = new_executor(connector.clone());
        let query = EthCallQueryRequest {
            block_id: MockConnector::block_hash(5).to_string(),
            call_data: vec![decimals()],
        };

        // When
        let response = executor.eth_call(&query).await?;

        // Then
        assert_eq!(response.block_number, 5);
        let calls = connector.batch_calls();
        let eth_call = calls.iter().find(|call| call.method == "eth_call").expect("eth_call");
        assert_eq!(eth_call.params[1]["requireCanonical"], serde_json::json!(true));

        Ok(())
    }

    #[tokio::test]
    async fn test_should_retry_blocks_above_max() {
        // Given
        let (executor, heights, _responses) = new_executor(connector());
        let executor = executor.with_max_block_number(100);
        heights.set_latest(150);
        heights.set_safe(150);
        heights.set_finalized(150);

        // When
        let call = EthCallQueryRequest { block_id: "0x65".into(), call_data: vec![decimals()] };
        let by_timestamp = EthCallByTimestampQueryRequest {
            target_timestamp: 2_205 * MICROS_PER_SECOND,
            target_block_id_hint: "0x64".into(),
            following_block_id_hint: "0x65".into(),
            call_data: vec![decimals()],
        };
        let with_finality = EthCallWithFinalityQueryRequest {
            block_id: "0x65".into(),
            finality: "finalized".into(),
            call_data: vec![decimals()],
        };
        let errors = [
            executor.eth_call(&call).await.map(|_| ()),
            executor.eth_call_by_timestamp(&by_timestamp).await.map(|_| ()),
            executor.eth_call_with_finality(&with_finality).await.map(|_| ()),
        ];

        // Then
        for result in errors {
            let err = result.unwrap_err();
            assert!(matches!(err, QueryError::BlockNumberTooHigh { number: 101, max: 100 }));
            assert_eq!(err.status(), QueryStatus::RetryNeeded);
        }
        let at_max = EthCallQueryRequest { block_id: "0x64".into(), call_data: vec![decimals()] };
        assert!(executor.eth_call(&at_max).await.is_ok());
    }

    #[tokio::test]
    async fn test_should_retry_empty_call_result() {
        let connector = connector();
        connector.set_eth_call_result(TOKEN, bytes!("0x313ce567"), Bytes::new());
        let (executor, _, mut responses) = new_executor(connector);
        let query = EthCallQueryRequest { block_id: "0x64".into(), call_data: vec![decimals()] };

        let status = executor.handle_query(request(ChainSpecificQuery::EthCall(query))).await;

        assert_eq!(status, QueryStatus::RetryNeeded);
        assert!(responses.recv().await.expect("response").response.is_none());
    }

    #[tokio::test]
    async fn test_should_reject_invalid_block_id() {
        let (executor, _, _responses) = new_executor(connector());
        let query = EthCallQueryRequest { block_id: "64".into(), call_data: vec![decimals()] };

        let status = executor.handle_query(request(ChainSpecificQuery::EthCall(query))).await;

        assert_eq!(status, QueryStatus::FatalError);
    }

    #[tokio::test]
    async fn test_should_call_at_timestamp_with_hints() -> eyre::Result<()> {
        // Given
        let (executor, _, _responses) = new_executor(connector());
        // block 100 at 2_200s, block 101 at 2_212s.
        let query = EthCallByTimestampQueryRequest {
            target_timestamp: 2_205 * MICROS_PER_SECOND,
            target_block_id_hint: "0x64".into(),
            following_block_id_hint: "0x65".into(),
            call_data: vec![decimals()],
        };

        // When
        let response = executor.eth_call_by_timestamp(&query).await?;

        // Then
        assert_eq!(response.target_block_number, 100);
        assert_eq!(response.following_block_number, 101);
        assert_eq!(response.target_block_time, 2_200 * MICROS_PER_SECOND);
        assert_eq!(response.following_block_time, 2_212 * MICROS_PER_SECOND);

        Ok(())
    }

    #[tokio::test]
    async fn test_should_reject_bad_timestamp_hints() {
        let (executor, _, _responses) = new_executor(connector());
        let mut query = EthCallByTimestampQueryRequest {
            target_timestamp: 2_205 * MICROS_PER_SECOND,
            target_block_id_hint: "0x64".into(),
            following_block_id_hint: "0x66".into(),
            call_data: vec![decimals()],
        };

        let err = executor.eth_call_by_timestamp(&query).await.unwrap_err();
        assert!(matches!(err, QueryError::NotAdjacent { target: 100, following: 102 }));
        assert_eq!(err.status(), QueryStatus::FatalError);

        query.following_block_id_hint = "0x65".into();
        query.target_timestamp = 2_212 * MICROS_PER_SECOND;
        let err = executor.eth_call_by_timestamp(&query).await.unwrap_err();
        assert!(matches!(err, QueryError::TimestampOutOfRange { .. }));
        assert_eq!(err.status(), QueryStatus::FatalError);

        query.following_block_id_hint = String::new();
        let err = executor.eth_call_by_timestamp(&query).await.unwrap_err();
        assert!(matches!(err, QueryError::InconsistentHints));
    }

    #[tokio::test]
    async fn test_should_call_at_timestamp_through_cache() -> eyre::Result<()> {
        // Given
        let cache = Arc::new(TimestampCache::default());
        cache.add_batch((90..=110).map(|n| Block::new(1_000 + n * 12, n)));
        let (executor, _, _responses) = new_executor(connector());
        let executor = executor.with_timestamp_cache(cache, None);
        let query = EthCallByTimestampQueryRequest {
            target_timestamp: 2_205 * MICROS_PER_SECOND,
            target_block_id_hint: String::new(),
            following_block_id_hint: String::new(),
            call_data: vec![decimals()],
        };

        // When
        let response = executor.eth_call_by_timestamp(&query).await?;

        // Then
        assert_eq!(response.target_block_number, 100);
        assert_eq!(response.following_block_number, 101);

        Ok(())
    }

    #[tokio::test]
    async fn test_should_classify_cache_misses() {
        let cache = Arc::new(TimestampCache::default());
        cache.add_batch([Block::new(2_200, 100), Block::new(2_260, 105), Block::new(2_272, 106)]);
        let (requester, mut backfill_requests) =
            BackfillRequester::channel(QueryMetrics::default());
        let (executor, _, _responses) = new_executor(connector());
        let executor = executor.with_timestamp_cache(cache.clone(), Some(requester));

        let err = executor.blocks_at(2_000 * MICROS_PER_SECOND).unwrap_err();
        assert!(matches!(err, QueryError::TimestampTooOld(2_000)));
        assert_eq!(err.status(), QueryStatus::FatalError);

        let err = executor.blocks_at(2_272 * MICROS_PER_SECOND).unwrap_err();
        assert!(matches!(err, QueryError::TimestampTooRecent(2_272)));
        assert_eq!(err.status(), QueryStatus::RetryNeeded);

        let err = executor.blocks_at(2_230 * MICROS_PER_SECOND).unwrap_err();
        assert!(matches!(err, QueryError::CacheGap { prev: 100, next: 105, .. }));
        assert_eq!(err.status(), QueryStatus::RetryNeeded);
        assert_eq!(backfill_requests.try_recv().ok(), Some(2_230));

        let executor = executor.with_timestamp_cache(cache, None);
        let err = executor.blocks_at(2_230 * MICROS_PER_SECOND).unwrap_err();
        assert_eq!(err.status(), QueryStatus::FatalError);
    }

    #[tokio::test]
    async fn test_should_gate_call_on_finality() -> eyre::Result<()> {
        // Given
        let (executor, heights, _responses) = new_executor(connector());
        heights.set_latest(150);
        heights.set_safe(100);
        heights.set_finalized(90);
        let mut query = EthCallWithFinalityQueryRequest {
            block_id: "0x64".into(),
            finality: "finalized".into(),
            call_data: vec![decimals()],
        };

        // When
        let err = executor.eth_call_with_finality(&query).await.unwrap_err();

        // Then
        assert!(matches!(err, QueryError::NotFinal { number: 100, latest: 90, .. }));
        assert_eq!(err.status(), QueryStatus::RetryNeeded);

        query.finality = "safe".into();
        assert_eq!(executor.eth_call_with_finality(&query).await?.block_number, 100);

        query.finality = "latest".into();
        let err = executor.eth_call_with_finality(&query).await.unwrap_err();
        assert_eq!(err.status(), QueryStatus::FatalError);

        Ok(())
    }

    #[tokio::test]
    async fn test_should_reject_unsupported_and_misrouted_queries() {
        let (executor, _, _responses) = new_executor(connector());
        let status = executor
            .handle_query(request(ChainSpecificQuery::Unsupported { query_type: 9 }))
            .await;
        assert_eq!(status, QueryStatus::FatalError);

        let mut misrouted = request(ChainSpecificQuery::EthCall(EthCallQueryRequest {
            block_id: "0x64".into(),
            call_data: vec![decimals()],
        }));
        misrouted.chain_id = ChainId(5);
        assert_eq!(executor.handle_query(misrouted).await, QueryStatus::FatalError);
    }

    #[tokio::test]
    async fn test_should_drop_response_when_channel_is_full() {
        let heights = Arc::new(AtomicBlockHeights::default());
        let (tx, mut rx) = mpsc::channel(1);
        let executor = QueryExecutor::new(
            connector(),
            ChainId::ETHEREUM,
            heights,
            tx,
            QueryMetrics::default(),
        );
        let query = ChainSpecificQuery::Unsupported { query_type: 9 };

        executor.handle_query(request(query.clone())).await;
        executor.handle_query(request(query)).await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_should_answer_queries_from_workers() {
        let (executor, _, mut responses) = new_executor(connector());
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let workers = Arc::new(executor).spawn_workers(2, rx, cancel.clone());

        for _ in 0..3 {
            tx.send(request(ChainSpecificQuery::Unsupported { query_type: 9 })).await.unwrap();
        }
        for _ in 0..3 {
            assert_eq!(responses.recv().await.unwrap().status, QueryStatus::FatalError);
        }

        cancel.cancel();
        for worker in workers {
            worker.await.unwrap();
        }
    }
}
