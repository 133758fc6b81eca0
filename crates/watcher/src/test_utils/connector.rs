use crate::{
    connector::{BatchCall, EvmConnector, Receipt},
    error::{ConnectorError, ConnectorResult},
};

use alloy_json_rpc::{ErrorPayload, RpcError};
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_rpc_types_eth::Log;
use alloy_sol_types::SolCall;
use guardian_evm_abi::calls::{
    getConfigurationCall, getCurrentGuardianSetIndexCall, getGuardianSetCall, GuardianSetData,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    ops::RangeInclusive,
    sync::atomic::{AtomicUsize, Ordering},
};

#[derive(Debug, Default)]
struct MockChain {
    /// Block timestamps by number.
    blocks: HashMap<u64, u64>,
    receipts: HashMap<B256, Receipt>,
    /// Failing receipts by transaction hash.
    receipt_errors: HashMap<B256, &'static str>,
    ccl_configurations: HashMap<Address, B256>,
    guardian_set: Option<(u32, Vec<Address>)>,
    eth_call_results: HashMap<(Address, Bytes), Bytes>,
    block_time_error: Option<&'static str>,
    batch_calls: Vec<BatchCall>,
}

/// A mock implementation of the [`EvmConnector`] trait, serving a chain whose block hashes are
/// derived from the block numbers.
#[derive(Debug)]
pub struct MockConnector {
    chain: Mutex<MockChain>,
    max_batch_size: usize,
    contract_calls: AtomicUsize,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self {
            chain: Mutex::default(),
            max_batch_size: usize::MAX,
            contract_calls: AtomicUsize::new(0),
        }
    }
}

/// Returns a JSON-RPC error response with the message.
pub fn error_response(message: &'static str) -> ConnectorError {
    ConnectorError::ProviderRpc(RpcError::ErrorResp(ErrorPayload {
        code: -32000,
        message: message.into(),
        data: None,
    }))
}

impl MockConnector {
    /// Rejects the batches larger than `max_batch_size`.
    pub const fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Returns the hash of the block number.
    pub fn block_hash(number: u64) -> B256 {
        B256::from(U256::from(number) + U256::from(1u64 << 32))
    }

    /// Adds the blocks of the range, with the timestamps returned by `timestamp`.
    pub fn add_chain(&self, numbers: RangeInclusive<u64>, timestamp: impl Fn(u64) -> u64) {
        let mut chain = self.chain.lock();
        for number in numbers {
            chain.blocks.insert(number, timestamp(number));
        }
    }

    /// Adds a receipt without logs for the transaction included at the block number.
    pub fn add_receipt(&self, tx_hash: B256, block_number: u64, status: bool) {
        self.add_receipt_with_logs(tx_hash, block_number, status, vec![]);
    }

    /// Adds a receipt for the transaction included at the block number.
    pub fn add_receipt_with_logs(
        &self,
        tx_hash: B256,
        block_number: u64,
        status: bool,
        logs: Vec<Log>,
    ) {
        let receipt = Receipt { status, block_hash: Self::block_hash(block_number), logs };
        let mut chain = self.chain.lock();
        chain.receipt_errors.remove(&tx_hash);
        chain.receipts.insert(tx_hash, receipt);
    }

    /// Removes the receipt of the transaction.
    pub fn remove_receipt(&self, tx_hash: B256) {
        self.chain.lock().receipts.remove(&tx_hash);
    }

    /// Fails the receipt requests of the transaction with the error message.
    pub fn fail_receipt(&self, tx_hash: B256, message: &'static str) {
        self.chain.lock().receipt_errors.insert(tx_hash, message);
    }

    /// Fails all block time requests with the error message.
    pub fn fail_block_times(&self, message: &'static str) {
        self.chain.lock().block_time_error = Some(message);
    }

    /// Sets the custom consistency configuration of the emitter.
    pub fn set_ccl_configuration(&self, emitter: Address, configuration: B256) {
        self.chain.lock().ccl_configurations.insert(emitter, configuration);
    }

    /// Sets the current guardian set.
    pub fn set_guardian_set(&self, index: u32, keys: Vec<Address>) {
        self.chain.lock().guardian_set = Some((index, keys));
    }

    /// Sets the result of the `eth_call` of `data` on `to`, at any block.
    pub fn set_eth_call_result(&self, to: Address, data: Bytes, result: Bytes) {
        self.chain.lock().eth_call_results.insert((to, data), result);
    }

    /// Returns the number of contract calls made through [`EvmConnector::call`].
    pub fn contract_calls(&self) -> usize {
        self.contract_calls.load(Ordering::Relaxed)
    }

    /// Returns the batch calls received so far.
    pub fn batch_calls(&self) -> Vec<BatchCall> {
        self.chain.lock().batch_calls.clone()
    }

    fn block(chain: &MockChain, number: u64) -> Value {
        chain.blocks.get(&number).map_or(Value::Null, |timestamp| {
            json!({
                "number": format!("0x{number:x}"),
                "hash": Self::block_hash(number),
                "timestamp": format!("0x{timestamp:x}"),
            })
        })
    }

    fn number_of_hash(hash: B256) -> Option<u64> {
        U256::from_be_bytes(hash.0)
            .checked_sub(U256::from(1u64 << 32))
            .and_then(|number| u64::try_from(number).ok())
    }

    fn handle_call(chain: &MockChain, call: &BatchCall) -> ConnectorResult<Value> {
        match call.method {
            "eth_getBlockByNumber" => {
                let id = call.params[0].as_str().unwrap_or_default();
                let number = if id == "latest" {
                    chain.blocks.keys().max().copied()
                } else {
                    u64::from_str_radix(id.trim_start_matches("0x"), 16).ok()
                };
                Ok(number.map_or(Value::Null, |number| Self::block(chain, number)))
            }
            "eth_getBlockByHash" => {
                let hash: B256 = serde_json::from_value(call.params[0].clone())?;
                Ok(Self::number_of_hash(hash)
                    .map_or(Value::Null, |number| Self::block(chain, number)))
            }
            "eth_call" => {
                let to: Address = serde_json::from_value(call.params[0]["to"].clone())?;
                let data: Bytes = serde_json::from_value(call.params[0]["data"].clone())?;
                let result = chain
                    .eth_call_results
                    .get(&(to, data))
                    .ok_or_else(|| error_response("execution reverted"))?;
                Ok(json!(result))
            }
            _ => Err(error_response("method not found")),
        }
    }
}

#[async_trait::async_trait]
impl EvmConnector for MockConnector {
    async fn transaction_receipt(&self, tx_hash: B256) -> ConnectorResult<Option<Receipt>> {
        let chain = self.chain.lock();
        if let Some(message) = chain.receipt_errors.get(&tx_hash) {
            return Err(error_response(message));
        }
        Ok(chain.receipts.get(&tx_hash).cloned())
    }

    async fn time_of_block_by_hash(&self, hash: B256) -> ConnectorResult<u64> {
        let chain = self.chain.lock();
        if let Some(message) = chain.block_time_error {
            return Err(error_response(message));
        }
        Self::number_of_hash(hash)
            .and_then(|number| chain.blocks.get(&number).copied())
            .ok_or(ConnectorError::NotFound)
    }

    async fn raw_batch_call(
        &self,
        calls: Vec<BatchCall>,
    ) -> ConnectorResult<Vec<ConnectorResult<Value>>> {
        if calls.len() > self.max_batch_size {
            return Err(error_response("batch too large"));
        }
        let mut chain = self.chain.lock();
        let results = calls.iter().map(|call| Self::handle_call(&chain, call)).collect();
        chain.batch_calls.extend(calls);
        Ok(results)
    }

    async fn call(&self, to: Address, input: Bytes) -> ConnectorResult<Bytes> {
        self.contract_calls.fetch_add(1, Ordering::Relaxed);
        let chain = self.chain.lock();
        let selector = input.get(..4).unwrap_or_default();

        if selector == getConfigurationCall::SELECTOR {
            let call = getConfigurationCall::abi_decode(&input)?;
            let configuration = chain
                .ccl_configurations
                .get(&call.emitterAddress)
                .ok_or_else(|| error_response("execution reverted"))?;
            return Ok(getConfigurationCall::abi_encode_returns(configuration).into());
        }

        let (index, keys) = chain.guardian_set.clone().ok_or(ConnectorError::NotFound)?;
        if selector == getCurrentGuardianSetIndexCall::SELECTOR {
            return Ok(getCurrentGuardianSetIndexCall::abi_encode_returns(&index).into());
        }
        if selector == getGuardianSetCall::SELECTOR {
            let data = GuardianSetData { keys, expirationTime: 0 };
            return Ok(getGuardianSetCall::abi_encode_returns(&data).into());
        }

        tracing::debug!(target: "guardian::watcher", %to, "unexpected contract call");
        Err(error_response("execution reverted"))
    }
}
