use crate::ChainId;

use alloy_primitives::{hex, Address, Bytes, B256};
use serde::{Deserialize, Serialize};

/// A message observed on a chain, ready to be handed to the signing pipeline once confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub struct MessagePublication {
    /// The hash of the transaction that emitted the message.
    pub tx_id: B256,
    /// The unix timestamp of the block containing the transaction, in seconds.
    pub timestamp: u64,
    /// The nonce set by the emitter.
    pub nonce: u32,
    /// The emitter's sequence number.
    pub sequence: u64,
    /// The chain the message was emitted on.
    pub emitter_chain: ChainId,
    /// The 32 bytes, left padded, emitter address.
    pub emitter_address: B256,
    /// The message payload.
    pub payload: Bytes,
    /// The consistency level byte, after custom resolution.
    pub consistency_level: u8,
    /// Whether the message was produced by a reobservation request.
    pub is_reobservation: bool,
}

impl MessagePublication {
    /// Returns the identifier of the message, formatted as `chain/emitter/sequence`.
    pub fn message_id(&self) -> String {
        format!("{}/{}/{}", self.emitter_chain, hex::encode(self.emitter_address), self.sequence)
    }
}

/// Left pads a 20 bytes address to the 32 bytes format used across chains.
pub fn pad_address(address: Address) -> B256 {
    address.into_word()
}

/// A request to observe again the messages emitted in a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationRequest {
    /// The chain id the request targets.
    pub chain_id: u32,
    /// The hash of the transaction.
    pub tx_hash: Bytes,
}
