use crate::test_utils::connector::MockConnector;

use alloy_primitives::{Address, B256};
use alloy_rpc_types_eth::Log;
use alloy_sol_types::SolEvent;
use guardian_evm_abi::logs::LogMessagePublished;

/// Test utils for arbitrary.
pub mod arbitrary;

/// Test utils for the chain connector.
pub mod connector;

/// Returns the log of the event emitted by `contract` in the transaction, at the block number of
/// the [`MockConnector`] chain.
pub fn message_log(
    contract: Address,
    tx_hash: B256,
    block_number: u64,
    event: &LogMessagePublished,
) -> Log {
    Log {
        inner: alloy_primitives::Log { address: contract, data: event.encode_log_data() },
        block_hash: Some(MockConnector::block_hash(block_number)),
        block_number: Some(block_number),
        transaction_hash: Some(tx_hash),
        ..Default::default()
    }
}
