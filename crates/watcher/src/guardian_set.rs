//! Tracks the guardian set of the core contract.

use crate::{
    connector::with_timeout,
    constants::{GUARDIAN_SET_POLL_INTERVAL, GUARDIAN_SET_TIMEOUT},
    error::ConnectorResult,
    metrics::WatcherMetrics,
    EvmConnector,
};

use alloy_primitives::Address;
use alloy_sol_types::SolCall;
use guardian_evm_abi::calls::{getCurrentGuardianSetIndexCall, getGuardianSetCall};
use guardian_primitives::GuardianSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Reads the current guardian set from the core contract.
pub async fn fetch_guardian_set<C: EvmConnector>(
    connector: &C,
    contract: Address,
) -> ConnectorResult<GuardianSet> {
    let input = getCurrentGuardianSetIndexCall {}.abi_encode();
    let output = with_timeout(GUARDIAN_SET_TIMEOUT, connector.call(contract, input.into())).await?;
    let index = getCurrentGuardianSetIndexCall::abi_decode_returns(&output)?;

    let input = getGuardianSetCall { index }.abi_encode();
    let output = with_timeout(GUARDIAN_SET_TIMEOUT, connector.call(contract, input.into())).await?;
    let set = getGuardianSetCall::abi_decode_returns(&output)?;

    Ok(GuardianSet { index, keys: set.keys })
}

/// Polls the guardian set and forwards it whenever its index changes.
#[derive(Debug)]
pub struct GuardianSetPoller<C> {
    connector: Arc<C>,
    contract: Address,
    sender: mpsc::Sender<GuardianSet>,
    current: Option<u32>,
    metrics: WatcherMetrics,
}

impl<C: EvmConnector> GuardianSetPoller<C> {
    /// Returns a new [`GuardianSetPoller`].
    pub const fn new(
        connector: Arc<C>,
        contract: Address,
        sender: mpsc::Sender<GuardianSet>,
        metrics: WatcherMetrics,
    ) -> Self {
        Self { connector, contract, sender, current: None, metrics }
    }

    /// Polls the guardian set once. Returns false if the receiver is gone.
    pub async fn poll(&mut self) -> bool {
        let set = match fetch_guardian_set(self.connector.as_ref(), self.contract).await {
            Ok(set) => set,
            Err(err) => {
                tracing::error!(target: "guardian::watcher", %err, "failed to fetch guardian set");
                self.metrics.connection_errors.increment(1);
                return true;
            }
        };
        if self.current == Some(set.index) {
            return true;
        }

        tracing::info!(target: "guardian::watcher", index = set.index, keys = set.keys.len(), "new guardian set");
        self.current = Some(set.index);
        self.metrics.guardian_set_changes.increment(1);
        self.sender.send(set).await.is_ok()
    }

    /// Polls the guardian set until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(GUARDIAN_SET_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if !self.poll().await {
                        tracing::warn!(target: "guardian::watcher", "guardian set channel closed, stopping the poller");
                        break;
                    }
                }
            }
        }
    }
}
