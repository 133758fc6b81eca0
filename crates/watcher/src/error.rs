use alloy_json_rpc::RpcError;
use alloy_primitives::B256;
use alloy_transport::TransportErrorKind;
use guardian_primitives::MessagePublication;
use std::time::Duration;
use tokio::sync::mpsc::error::SendError;

/// A [`Result`] that uses [`WatcherError`] as the error type.
pub type WatcherResult<T> = Result<T, WatcherError>;

/// A [`Result`] that uses [`ConnectorError`] as the error type.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Error messages returned by nodes when a block is not yet available to them.
const RETRYABLE_BLOCK_TIME_ERRORS: [&str; 3] =
    ["not found", "Unknown block", "cannot query unfinalized data"];

/// An error that occurred with the EVM watcher.
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    /// An error from the chain connector.
    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),
    /// A subscription returned an error or was closed.
    #[error("{subscription} subscription failed: {source}")]
    Subscription {
        /// The name of the subscription.
        subscription: &'static str,
        /// The cause.
        source: ConnectorError,
    },
    /// An error related to the logs of the core contract.
    #[error(transparent)]
    Logs(#[from] FilterLogError),
    /// An error when handling a reobservation request.
    #[error(transparent)]
    Reobservation(#[from] ReobservationError),
    /// The message channel was closed.
    #[error("message channel closed")]
    MessageChannelClosed(#[from] SendError<MessagePublication>),
}

/// An error returned by an [`crate::EvmConnector`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// A Provider error at the RPC level.
    #[error("execution provider rpc error: {0:?}")]
    ProviderRpc(#[from] RpcError<TransportErrorKind>),
    /// The requested item does not exist.
    #[error("not found")]
    NotFound,
    /// The request did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// A contract call returned data that could not be decoded.
    #[error("failed to decode contract call result: {0}")]
    Decode(#[from] alloy_sol_types::Error),
    /// A batch response could not be deserialized.
    #[error("failed to deserialize response: {0}")]
    Deserialize(#[from] serde_json::Error),
    /// The stream was closed by the connector.
    #[error("stream closed")]
    Closed,
}

impl ConnectorError {
    /// Returns true if the error indicates the requested item does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound | Self::ProviderRpc(RpcError::NullResp) => true,
            Self::ProviderRpc(RpcError::ErrorResp(payload)) => payload.message == "not found",
            _ => false,
        }
    }

    /// Returns true if a block time lookup failing with this error may succeed later.
    pub fn is_retryable_block_time(&self) -> bool {
        match self {
            Self::NotFound | Self::ProviderRpc(RpcError::NullResp) => true,
            Self::ProviderRpc(RpcError::ErrorResp(payload)) => {
                RETRYABLE_BLOCK_TIME_ERRORS.iter().any(|msg| payload.message.contains(msg))
            }
            _ => false,
        }
    }
}

/// An error that occurred when filtering logs.
#[derive(Debug, thiserror::Error)]
pub enum FilterLogError {
    /// The log is missing a block number.
    #[error("missing block number for log")]
    MissingBlockNumber,
    /// The log is missing a block hash.
    #[error("missing block hash for log")]
    MissingBlockHash,
    /// The log is missing a transaction hash.
    #[error("unknown transaction hash for log")]
    MissingTransactionHash,
    /// Failed to decode the log.
    #[error("failed to decode log of type {log_type} with error {error}")]
    DecodeLogFailed {
        /// The type of the log.
        log_type: &'static str,
        /// The decoding error.
        error: alloy_sol_types::Error,
    },
}

/// An error that occurred when handling a reobservation request.
#[derive(Debug, thiserror::Error)]
pub enum ReobservationError {
    /// The chain id does not fit a chain identifier.
    #[error("invalid chain id {0}")]
    InvalidChainId(u32),
    /// The request targets another chain.
    #[error("unexpected chain id {got}, expected {expected}")]
    UnexpectedChainId {
        /// The chain id of the request.
        got: u32,
        /// The chain id of the watcher.
        expected: u16,
    },
    /// The transaction hash is not 32 bytes.
    #[error("invalid transaction hash length {0}")]
    InvalidTxHash(usize),
    /// The transaction has no receipt.
    #[error("no receipt for transaction {0}")]
    MissingReceipt(B256),
    /// The transaction was reverted.
    #[error("transaction {0} failed")]
    TransactionFailed(B256),
}
