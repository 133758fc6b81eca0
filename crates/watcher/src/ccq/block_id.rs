use crate::connector::BatchCall;

use serde_json::{json, Value};

/// The number of hex digits of a block hash.
const BLOCK_HASH_HEX_LEN: usize = 64;

/// An error parsing a query block identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockIdError {
    /// The identifier is empty.
    #[error("block id is required")]
    Missing,
    /// The identifier is not 0x prefixed.
    #[error("block id must start with 0x")]
    MissingPrefix,
    /// The identifier is not hex.
    #[error("block id is not valid hex")]
    InvalidHex,
}

/// A block identifier of a query, resolved to the JSON-RPC shape used to look it up.
///
/// The identifier is a hash if and only if it has 64 hex digits once left-padded to an even
/// length, whatever its value. In both cases the identifier is forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRequest {
    /// A block number.
    Number(String),
    /// A block hash.
    Hash(String),
}

impl BlockRequest {
    /// Parses a block identifier.
    pub fn parse(block_id: &str) -> Result<Self, BlockIdError> {
        if block_id.is_empty() {
            return Err(BlockIdError::Missing);
        }
        let digits = block_id.strip_prefix("0x").ok_or(BlockIdError::MissingPrefix)?;

        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(BlockIdError::InvalidHex);
        }

        let padded_len = digits.len() + digits.len() % 2;
        if padded_len == BLOCK_HASH_HEX_LEN {
            Ok(Self::Hash(block_id.to_owned()))
        } else {
            Ok(Self::Number(block_id.to_owned()))
        }
    }

    /// Returns the method used to look the block up.
    pub const fn method(&self) -> &'static str {
        match self {
            Self::Number(_) => "eth_getBlockByNumber",
            Self::Hash(_) => "eth_getBlockByHash",
        }
    }

    /// Returns the identifier.
    pub fn id(&self) -> &str {
        match self {
            Self::Number(id) | Self::Hash(id) => id,
        }
    }

    /// Returns the block argument of calls executed at this block.
    pub fn call_block_arg(&self) -> Value {
        match self {
            Self::Number(number) => json!(number),
            Self::Hash(hash) => json!({ "blockHash": hash, "requireCanonical": true }),
        }
    }

    /// Returns the batch call looking the block up, without transactions.
    pub fn block_call(&self) -> BatchCall {
        BatchCall::new(self.method(), json!([self.id(), false]))
    }
}
