use crate::error::{ConnectorError, ConnectorResult};

use alloy_network::ReceiptResponse;
use alloy_primitives::{Address, Bytes, B256, U64};
use alloy_provider::Provider;
use alloy_rpc_client::BatchRequest;
use alloy_rpc_types_eth::{Log, TransactionRequest};
use serde::Deserialize;
use std::{future::Future, time::Duration};

/// The finality of a header delivered by the header subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Finality {
    /// The chain head.
    Latest,
    /// The latest safe block.
    Safe,
    /// The latest finalized block.
    Finalized,
}

/// A new header delivered by the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewHeader {
    /// The block number.
    pub number: u64,
    /// The block hash.
    pub hash: B256,
    /// The block timestamp, in seconds.
    pub time: u64,
    /// The finality the header was delivered for.
    pub finality: Finality,
}

/// The parts of a transaction receipt the watcher relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    /// Whether the transaction succeeded.
    pub status: bool,
    /// The hash of the block containing the transaction.
    pub block_hash: B256,
    /// The logs emitted by the transaction.
    pub logs: Vec<Log>,
}

/// A JSON-RPC call of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchCall {
    /// The RPC method.
    pub method: &'static str,
    /// The parameters of the call.
    pub params: serde_json::Value,
}

impl BatchCall {
    /// Returns a new [`BatchCall`].
    pub const fn new(method: &'static str, params: serde_json::Value) -> Self {
        Self { method, params }
    }
}

/// The subset of a JSON-RPC block the watcher reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BlockMarshaller {
    /// The block number.
    pub number: U64,
    /// The block hash.
    pub hash: B256,
    /// The block timestamp, in seconds.
    pub timestamp: U64,
}

impl BlockMarshaller {
    /// Parses a block from a JSON-RPC result. Returns [`None`] for a null result.
    pub fn from_value(value: serde_json::Value) -> ConnectorResult<Option<Self>> {
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    /// Returns the block number.
    pub fn number(&self) -> u64 {
        self.number.to()
    }

    /// Returns the block timestamp.
    pub fn timestamp(&self) -> u64 {
        self.timestamp.to()
    }
}

/// The chain client capability consumed by the watcher.
#[async_trait::async_trait]
pub trait EvmConnector: Send + Sync {
    /// Returns the receipt of the transaction, or [`None`] if the transaction is unknown.
    async fn transaction_receipt(&self, tx_hash: B256) -> ConnectorResult<Option<Receipt>>;

    /// Returns the time of the block, in seconds.
    async fn time_of_block_by_hash(&self, hash: B256) -> ConnectorResult<u64>;

    /// Executes a batch of JSON-RPC calls. The outer result fails if the batch could not be
    /// executed, each element carries the result of the corresponding call.
    async fn raw_batch_call(
        &self,
        calls: Vec<BatchCall>,
    ) -> ConnectorResult<Vec<ConnectorResult<serde_json::Value>>>;

    /// Executes a read only contract call against the latest block.
    async fn call(&self, to: Address, input: Bytes) -> ConnectorResult<Bytes>;
}

#[async_trait::async_trait]
impl<P: Provider> EvmConnector for P {
    async fn transaction_receipt(&self, tx_hash: B256) -> ConnectorResult<Option<Receipt>> {
        let receipt = self.get_transaction_receipt(tx_hash).await?;
        Ok(receipt.map(|receipt| Receipt {
            status: ReceiptResponse::status(&receipt),
            block_hash: receipt.block_hash.unwrap_or_default(),
            logs: receipt.inner.logs().to_vec(),
        }))
    }

    async fn time_of_block_by_hash(&self, hash: B256) -> ConnectorResult<u64> {
        let block = self.get_block_by_hash(hash).await?.ok_or(ConnectorError::NotFound)?;
        Ok(block.header.timestamp)
    }

    async fn raw_batch_call(
        &self,
        calls: Vec<BatchCall>,
    ) -> ConnectorResult<Vec<ConnectorResult<serde_json::Value>>> {
        let mut batch = BatchRequest::new(self.client());
        let mut waiters = Vec::with_capacity(calls.len());
        for call in &calls {
            waiters.push(batch.add_call::<_, serde_json::Value>(call.method, &call.params)?);
        }
        batch.send().await?;

        let mut results = Vec::with_capacity(waiters.len());
        for waiter in waiters {
            results.push(waiter.await.map_err(Into::into));
        }
        Ok(results)
    }

    async fn call(&self, to: Address, input: Bytes) -> ConnectorResult<Bytes> {
        let request = TransactionRequest::default().to(to).input(input.into());
        Ok(Provider::call(self, request).await?)
    }
}

/// Awaits the future, failing with [`ConnectorError::Timeout`] after `duration`.
pub(crate) async fn with_timeout<T>(
    duration: Duration,
    fut: impl Future<Output = ConnectorResult<T>>,
) -> ConnectorResult<T> {
    tokio::time::timeout(duration, fut).await.map_err(|_| ConnectorError::Timeout(duration))?
}
