//! Cross-chain query request and response types, as routed to a single chain watcher.

use crate::ChainId;

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

/// The query type byte for [`ChainSpecificQuery::EthCall`].
pub const ETH_CALL_QUERY_TYPE: u8 = 1;
/// The query type byte for [`ChainSpecificQuery::EthCallByTimestamp`].
pub const ETH_CALL_BY_TIMESTAMP_QUERY_TYPE: u8 = 2;
/// The query type byte for [`ChainSpecificQuery::EthCallWithFinality`].
pub const ETH_CALL_WITH_FINALITY_QUERY_TYPE: u8 = 3;

/// A single contract call of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthCallData {
    /// The contract to call.
    pub to: Address,
    /// The ABI encoded call data.
    pub data: Bytes,
}

/// A set of calls to execute at a given block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthCallQueryRequest {
    /// The block identifier, either a hex block number or a 32 bytes block hash.
    pub block_id: String,
    /// The calls to execute.
    pub call_data: Vec<EthCallData>,
}

/// A set of calls to execute at the block which was the head at the given time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthCallByTimestampQueryRequest {
    /// The target timestamp, in microseconds.
    pub target_timestamp: u64,
    /// The hint for the target block. Empty to resolve it through the block cache.
    pub target_block_id_hint: String,
    /// The hint for the block following the target. Empty to resolve it through the block
    /// cache.
    pub following_block_id_hint: String,
    /// The calls to execute.
    pub call_data: Vec<EthCallData>,
}

/// A set of calls to execute at a block which must have reached the requested finality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthCallWithFinalityQueryRequest {
    /// The block identifier.
    pub block_id: String,
    /// The required finality, `safe` or `finalized`.
    pub finality: String,
    /// The calls to execute.
    pub call_data: Vec<EthCallData>,
}

/// The chain specific part of a query request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainSpecificQuery {
    /// Calls at a block.
    EthCall(EthCallQueryRequest),
    /// Calls at a timestamp.
    EthCallByTimestamp(EthCallByTimestampQueryRequest),
    /// Calls at a block with a finality requirement.
    EthCallWithFinality(EthCallWithFinalityQueryRequest),
    /// A query type the watcher does not know about.
    Unsupported {
        /// The raw query type.
        query_type: u8,
    },
}

impl ChainSpecificQuery {
    /// Returns the query type byte.
    pub const fn query_type(&self) -> u8 {
        match self {
            Self::EthCall(_) => ETH_CALL_QUERY_TYPE,
            Self::EthCallByTimestamp(_) => ETH_CALL_BY_TIMESTAMP_QUERY_TYPE,
            Self::EthCallWithFinality(_) => ETH_CALL_WITH_FINALITY_QUERY_TYPE,
            Self::Unsupported { query_type } => *query_type,
        }
    }
}

/// A query request for a single chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerChainQueryRequest {
    /// The identifier of the overall request.
    pub request_id: String,
    /// The index of this per chain query within the overall request.
    pub request_idx: usize,
    /// The chain the query targets.
    pub chain_id: ChainId,
    /// The query.
    pub query: ChainSpecificQuery,
}

/// The status of a query response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryStatus {
    /// The query succeeded.
    Success,
    /// The query failed but may succeed if retried.
    RetryNeeded,
    /// The query failed and should not be retried.
    FatalError,
}

impl core::fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::RetryNeeded => write!(f, "retryNeeded"),
            Self::FatalError => write!(f, "fatalError"),
        }
    }
}

/// The result of calls executed at a single block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthCallQueryResponse {
    /// The block number the calls were executed at.
    pub block_number: u64,
    /// The hash of the block.
    pub hash: B256,
    /// The time of the block, in microseconds.
    pub time: u64,
    /// The call results, in request order.
    pub results: Vec<Bytes>,
}

/// The result of calls executed at a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthCallByTimestampQueryResponse {
    /// The number of the target block.
    pub target_block_number: u64,
    /// The hash of the target block.
    pub target_block_hash: B256,
    /// The time of the target block, in microseconds.
    pub target_block_time: u64,
    /// The number of the block following the target.
    pub following_block_number: u64,
    /// The hash of the block following the target.
    pub following_block_hash: B256,
    /// The time of the block following the target, in microseconds.
    pub following_block_time: u64,
    /// The call results, in request order.
    pub results: Vec<Bytes>,
}

/// The chain specific part of a query response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainSpecificResponse {
    /// Response to [`ChainSpecificQuery::EthCall`].
    EthCall(EthCallQueryResponse),
    /// Response to [`ChainSpecificQuery::EthCallByTimestamp`].
    EthCallByTimestamp(EthCallByTimestampQueryResponse),
    /// Response to [`ChainSpecificQuery::EthCallWithFinality`].
    EthCallWithFinality(EthCallQueryResponse),
}

/// A query response for a single chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerChainQueryResponse {
    /// The identifier of the overall request.
    pub request_id: String,
    /// The index of the per chain query within the overall request.
    pub request_idx: usize,
    /// The chain the query targeted.
    pub chain_id: ChainId,
    /// The status of the response.
    pub status: QueryStatus,
    /// The response, set on success.
    pub response: Option<ChainSpecificResponse>,
}

impl PerChainQueryResponse {
    /// Returns a response for the request with the given status and result.
    pub fn new(
        request: &PerChainQueryRequest,
        status: QueryStatus,
        response: Option<ChainSpecificResponse>,
    ) -> Self {
        Self {
            request_id: request.request_id.clone(),
            request_idx: request.request_idx,
            chain_id: request.chain_id,
            status,
            response,
        }
    }
}
