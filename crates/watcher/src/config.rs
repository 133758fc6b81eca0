use alloy_primitives::Address;
use guardian_primitives::{ChainId, Environment};
use serde::Deserialize;

/// The default number of query workers.
pub const DEFAULT_QUERY_WORKERS: usize = 5;

/// The configuration of an EVM watcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherConfig {
    /// The chain watched.
    pub chain_id: ChainId,
    /// The human readable name of the chain, used in logs.
    pub network_name: String,
    /// The environment the watcher runs in.
    #[serde(default)]
    pub environment: Environment,
    /// The core contract address.
    pub contract_address: Address,
    /// The minimum number of confirmations of a confirmation based message.
    #[serde(default)]
    pub min_confirmations: u64,
    /// The custom consistency level configuration, if the chain has a registry.
    #[serde(default)]
    pub ccl: Option<CclConfig>,
    /// The cross-chain query configuration.
    #[serde(default)]
    pub ccq: CcqConfig,
}

impl WatcherConfig {
    /// Returns a configuration with the default settings for the chain and core contract.
    pub fn new(
        chain_id: ChainId,
        network_name: impl Into<String>,
        contract_address: Address,
    ) -> Self {
        Self {
            chain_id,
            network_name: network_name.into(),
            environment: Environment::default(),
            contract_address,
            min_confirmations: 0,
            ccl: None,
            ccq: CcqConfig::default(),
        }
    }

    /// Returns the registry contract if custom consistency levels are enabled.
    ///
    /// Unless explicitly set, custom levels are only enabled on test networks.
    pub fn ccl_contract(&self) -> Option<Address> {
        let ccl = self.ccl.as_ref()?;
        let enabled =
            ccl.enabled.unwrap_or_else(|| self.environment.custom_consistency_by_default());
        enabled.then_some(ccl.contract_address)
    }
}

/// The custom consistency level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CclConfig {
    /// The address of the registry contract.
    pub contract_address: Address,
    /// Overrides the environment default.
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// The cross-chain query configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CcqConfig {
    /// The number of concurrent query workers.
    pub num_workers: usize,
    /// Whether queries by timestamp without hints are answered through a block cache.
    pub timestamp_cache_supported: bool,
    /// Whether the block cache is backfilled on gaps.
    pub backfill_cache: bool,
    /// The highest block number served by calls at a block.
    pub max_block_number: u64,
}

impl Default for CcqConfig {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_QUERY_WORKERS,
            timestamp_cache_supported: false,
            backfill_cache: true,
            max_block_number: u64::MAX,
        }
    }
}
