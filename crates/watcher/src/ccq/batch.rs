use super::error::QueryError;
use crate::{
    connector::{BatchCall, BlockMarshaller},
    error::ConnectorResult,
};

use alloy_primitives::Bytes;
use guardian_primitives::query::EthCallData;
use serde_json::{json, Value};

/// Returns the `eth_call` of the call data at the block.
pub(super) fn eth_call(call: &EthCallData, block_arg: &Value) -> BatchCall {
    BatchCall::new("eth_call", json!([{ "to": call.to, "data": call.data }, block_arg]))
}

/// Parses the result of a block lookup of the batch.
pub(super) fn parse_block(
    label: &'static str,
    result: Option<ConnectorResult<Value>>,
) -> Result<BlockMarshaller, QueryError> {
    let invalid = |reason: String| QueryError::InvalidBlock { label, reason };

    let value = result.ok_or_else(|| invalid("missing result".into()))?;
    let value = value.map_err(|err| invalid(err.to_string()))?;
    BlockMarshaller::from_value(value)
        .map_err(|err| invalid(err.to_string()))?
        .ok_or_else(|| invalid("block not found".into()))
}

/// Parses the results of the calls of the batch. Empty results are rejected.
pub(super) fn parse_call_results(
    results: impl Iterator<Item = ConnectorResult<Value>>,
) -> Result<Vec<Bytes>, QueryError> {
    results
        .enumerate()
        .map(|(index, result)| {
            let value = result.map_err(|err| QueryError::Call { index, reason: err.to_string() })?;
            let bytes: Bytes = serde_json::from_value(value)
                .map_err(|err| QueryError::Call { index, reason: err.to_string() })?;
            if bytes.is_empty() {
                return Err(QueryError::EmptyResult(index));
            }
            Ok(bytes)
        })
        .collect()
}
