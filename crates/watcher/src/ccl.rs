//! Custom consistency levels: per emitter configuration read from the registry contract, and the
//! gating of messages held for a number of blocks past their base level.

use crate::{
    connector::with_timeout,
    constants::{CCL_CACHE_CAPACITY, CCL_CACHE_TTL, CCL_READ_TIMEOUT},
    error::ConnectorError,
    heights::BlockHeights,
    EvmConnector, WatcherMetrics,
};

use alloy_primitives::{Address, B256};
use alloy_sol_types::SolCall;
use guardian_evm_abi::calls::getConfigurationCall;
use guardian_primitives::ConsistencyLevel;
use lru::LruCache;
use parking_lot::Mutex;
use std::{
    num::NonZeroUsize,
    sync::Arc,
    time::{Duration, Instant},
};

/// The type tag of [`CustomConsistency::NothingSpecial`].
const NOTHING_SPECIAL_TAG: u8 = 0;
/// The type tag of [`CustomConsistency::AdditionalBlocks`].
const ADDITIONAL_BLOCKS_TAG: u8 = 1;

/// An error when reading the custom consistency configuration of an emitter.
#[derive(Debug, thiserror::Error)]
pub enum CclError {
    /// The configuration has an unknown type tag.
    #[error("unknown configuration type {0}")]
    UnknownType(u8),
    /// The additional blocks configuration has a base level that is not a finality target.
    #[error("invalid base consistency level {0}")]
    InvalidBaseLevel(u8),
    /// The registry contract could not be read.
    #[error("failed to read configuration: {0}")]
    Read(#[from] ConnectorError),
}

/// The decoded custom consistency configuration of an emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomConsistency {
    /// No custom behaviour.
    NothingSpecial,
    /// Wait for a number of blocks past the base level.
    AdditionalBlocks {
        /// The base level, one of publish immediately, safe or finalized.
        consistency_level: ConsistencyLevel,
        /// The number of blocks to wait past the base level.
        blocks: u16,
    },
}

impl CustomConsistency {
    /// Decodes the 32 bytes configuration record.
    ///
    /// Byte 0 is the type tag. For the additional blocks type, byte 1 is the base consistency
    /// level and bytes 2 and 3 are the big endian number of blocks.
    pub fn decode(data: &B256) -> Result<Self, CclError> {
        match data[0] {
            NOTHING_SPECIAL_TAG => Ok(Self::NothingSpecial),
            ADDITIONAL_BLOCKS_TAG => {
                let consistency_level = ConsistencyLevel::from(data[1]);
                if !consistency_level.is_valid_custom_base() {
                    return Err(CclError::InvalidBaseLevel(data[1]));
                }
                let blocks = u16::from_be_bytes([data[2], data[3]]);
                Ok(Self::AdditionalBlocks { consistency_level, blocks })
            }
            tag => Err(CclError::UnknownType(tag)),
        }
    }
}

/// The consistency a custom level message resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CclResolution {
    /// The resolved consistency level.
    pub consistency_level: ConsistencyLevel,
    /// The number of blocks to wait past the resolved level.
    pub additional_blocks: u64,
}

impl CclResolution {
    /// The resolution used whenever the configuration is missing or unusable.
    pub const FINALIZED: Self =
        Self { consistency_level: ConsistencyLevel::Finalized, additional_blocks: 0 };
}

#[derive(Debug, Clone, Copy)]
struct CclCacheEntry {
    data: B256,
    read_time: Instant,
}

/// Resolves custom consistency levels against the registry contract.
#[derive(Debug)]
pub struct CclEngine<C> {
    /// The chain connector.
    connector: Arc<C>,
    /// The registry contract, [`None`] if custom levels are disabled.
    contract: Option<Address>,
    /// The cached configurations, keyed by emitter.
    cache: Mutex<LruCache<Address, CclCacheEntry>>,
    /// The time to live of a cached configuration.
    ttl: Duration,
    /// The watcher metrics.
    metrics: WatcherMetrics,
}

impl<C: EvmConnector> CclEngine<C> {
    /// Returns a new [`CclEngine`]. Custom levels are disabled if no contract is provided.
    pub fn new(connector: Arc<C>, contract: Option<Address>, metrics: WatcherMetrics) -> Self {
        let capacity = NonZeroUsize::new(CCL_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            connector,
            contract,
            cache: Mutex::new(LruCache::new(capacity)),
            ttl: CCL_CACHE_TTL,
            metrics,
        }
    }

    /// Sets the time to live of cached configurations.
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns true if custom levels are enabled.
    pub const fn is_enabled(&self) -> bool {
        self.contract.is_some()
    }

    /// Resolves the consistency of a custom level message from the emitter.
    ///
    /// Falls back to [`CclResolution::FINALIZED`] if the feature is disabled, the configuration
    /// cannot be read or decoded, or the emitter has no custom configuration.
    pub async fn resolve(&self, emitter: Address) -> CclResolution {
        let Some(contract) = self.contract else {
            tracing::debug!(target: "guardian::ccl", %emitter, "custom consistency disabled, using finalized");
            self.metrics.ccl_fallbacks.increment(1);
            return CclResolution::FINALIZED;
        };

        let resolution = self
            .configuration(contract, emitter)
            .await
            .and_then(|data| CustomConsistency::decode(&data));

        match resolution {
            Ok(CustomConsistency::AdditionalBlocks { consistency_level, blocks }) => {
                tracing::debug!(target: "guardian::ccl", %emitter, %consistency_level, blocks, "resolved custom consistency");
                CclResolution { consistency_level, additional_blocks: blocks.into() }
            }
            Ok(CustomConsistency::NothingSpecial) => {
                tracing::debug!(target: "guardian::ccl", %emitter, "no custom consistency configured, using finalized");
                self.metrics.ccl_fallbacks.increment(1);
                CclResolution::FINALIZED
            }
            Err(err) => {
                tracing::warn!(target: "guardian::ccl", %emitter, %err, "failed to resolve custom consistency, using finalized");
                self.metrics.ccl_fallbacks.increment(1);
                CclResolution::FINALIZED
            }
        }
    }

    /// Returns the configuration of the emitter, reading it from the contract on a cache miss.
    async fn configuration(&self, contract: Address, emitter: Address) -> Result<B256, CclError> {
        let cached = self.cache.lock().get(&emitter).copied();
        match cached {
            Some(entry) if entry.read_time.elapsed() < self.ttl => return Ok(entry.data),
            Some(_) => {
                self.cache.lock().pop(&emitter);
            }
            None => {}
        }

        let input = getConfigurationCall { emitterAddress: emitter }.abi_encode();
        let output =
            with_timeout(CCL_READ_TIMEOUT, self.connector.call(contract, input.into())).await?;
        let data =
            getConfigurationCall::abi_decode_returns(&output).map_err(ConnectorError::from)?;

        self.cache.lock().put(emitter, CclCacheEntry { data, read_time: Instant::now() });
        Ok(data)
    }
}

/// Returns true if a message held for `additional_blocks` past its base level can be released.
///
/// The base target is the safe or finalized height, or the message height for a publish
/// immediately base. Both the message height and the end of the additional window must be
/// reached at evaluation time.
pub fn should_publish(
    consistency_level: ConsistencyLevel,
    height: u64,
    additional_blocks: u64,
    heights: BlockHeights,
) -> bool {
    let base = match consistency_level {
        ConsistencyLevel::Safe => heights.safe,
        ConsistencyLevel::Finalized => heights.finalized,
        ConsistencyLevel::PublishImmediately => height,
        ConsistencyLevel::Custom | ConsistencyLevel::Confirmations(_) => {
            tracing::warn!(target: "guardian::ccl", %consistency_level, "unexpected base consistency level");
            return false;
        }
    };
    height <= base && base.saturating_add(additional_blocks) <= heights.latest
}
