use crate::{
    connector::with_timeout,
    constants::RECEIPT_TIMEOUT,
    is_message_log,
    pending::{PendingObservation, Readiness},
    EvmConnector, PublishedLog, ReobservationError, Watcher, WatcherResult,
};

use alloy_primitives::{hex, B256};
use guardian_primitives::ChainId;

impl<C: EvmConnector + 'static> Watcher<C> {
    /// Observes again the messages emitted by a transaction and publishes those whose block
    /// already reached the requested consistency. Returns the number of messages published.
    #[tracing::instrument(target = "guardian::watcher", skip_all, fields(chain_id = chain_id, tx_hash = %hex::encode_prefixed(tx_hash)))]
    pub async fn handle_reobservation_request(
        &self,
        chain_id: u32,
        tx_hash: &[u8],
    ) -> WatcherResult<u32> {
        let requested =
            ChainId::try_from(chain_id).map_err(|_| ReobservationError::InvalidChainId(chain_id))?;
        if requested != self.config.chain_id {
            return Err(ReobservationError::UnexpectedChainId {
                got: chain_id,
                expected: self.config.chain_id.as_u16(),
            }
            .into());
        }
        let tx_hash = B256::try_from(tx_hash)
            .map_err(|_| ReobservationError::InvalidTxHash(tx_hash.len()))?;

        let receipt = with_timeout(RECEIPT_TIMEOUT, self.connector.transaction_receipt(tx_hash))
            .await?
            .ok_or(ReobservationError::MissingReceipt(tx_hash))?;
        if !receipt.status {
            return Err(ReobservationError::TransactionFailed(tx_hash).into());
        }

        let heights = self.heights.snapshot();
        let mut published = 0;
        let logs =
            receipt.logs.iter().filter(|log| is_message_log(log, self.config.contract_address));
        for log in logs {
            let log = PublishedLog::from_log(log)?;
            let timestamp = self.block_time(log.block_hash).await?;
            let (message, additional_blocks) = self.message(&log, timestamp, true).await;
            let msg_id = message.message_id();

            let observation =
                PendingObservation { message, height: log.block_number, additional_blocks };
            let level = observation.consistency_level();
            match observation.readiness(self.config.min_confirmations, heights) {
                Readiness::Ready | Readiness::TimedOut => {
                    tracing::info!(target: "guardian::watcher", %msg_id, %level, height = log.block_number, "reobserved message");
                    self.publish(observation.message).await?;
                    published += 1;
                }
                Readiness::Waiting => {
                    tracing::info!(target: "guardian::watcher", %msg_id, %level, height = log.block_number, ?heights, "ignoring reobservation, consistency not reached");
                }
            }
        }

        Ok(published)
    }
}
