//! Integration tests of the pending observation state machine of the watcher.
#![cfg(feature = "test-utils")]

use alloy_primitives::{Address, Bytes, B256};
use arbitrary::Arbitrary;
use guardian_evm_abi::logs::LogMessagePublished;
use guardian_evm_watcher::{
    random,
    test_utils::{connector::MockConnector, message_log},
    CclConfig, Finality, NewHeader, Watcher, WatcherConfig,
};
use guardian_primitives::{ChainId, MessagePublication};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{subscriber::set_global_default, Level};

const CORE: Address = Address::repeat_byte(0x11);
const EMITTER: Address = Address::repeat_byte(0x22);
const REGISTRY: Address = Address::repeat_byte(0xcc);

fn setup() {
    let sub = tracing_subscriber::FmtSubscriber::builder().with_max_level(Level::TRACE).finish();
    let _ = set_global_default(sub);
}

fn watcher(
    connector: Arc<MockConnector>,
    config: WatcherConfig,
) -> (Arc<Watcher<MockConnector>>, mpsc::Receiver<MessagePublication>) {
    let (tx, rx) = mpsc::channel(16);
    (Arc::new(Watcher::new(connector, config, tx)), rx)
}

fn event(consistency_level: u8) -> LogMessagePublished {
    LogMessagePublished {
        sender: EMITTER,
        sequence: 42,
        nonce: 7,
        payload: Bytes::from_static(b"hello"),
        consistencyLevel: consistency_level,
    }
}

async fn header(
    watcher: &Watcher<MockConnector>,
    number: u64,
    finality: Finality,
) -> eyre::Result<()> {
    let header =
        NewHeader { number, hash: MockConnector::block_hash(number), time: number * 12, finality };
    Ok(watcher.handle_new_header(header).await?)
}

type Observed =
    (Arc<MockConnector>, Arc<Watcher<MockConnector>>, mpsc::Receiver<MessagePublication>, B256);

/// Returns a connector with a 300 blocks chain and a watcher observing a message at block 100.
async fn observed(consistency_level: u8, config: WatcherConfig) -> eyre::Result<Observed> {
    let connector = Arc::new(MockConnector::default());
    connector.add_chain(0..=300, |n| n * 12);
    let tx_hash = random!(B256);
    let (watcher, rx) = watcher(connector.clone(), config);

    header(&watcher, 100, Finality::Latest).await?;
    watcher.handle_log(message_log(CORE, tx_hash, 100, &event(consistency_level))).await?;
    assert_eq!(watcher.pending_count().await, 1);

    Ok((connector, watcher, rx, tx_hash))
}

fn config() -> WatcherConfig {
    WatcherConfig::new(ChainId::ETHEREUM, "eth", CORE)
}

#[tokio::test]
async fn test_should_confirm_after_expected_confirmations() -> eyre::Result<()> {
    // Given
    setup();
    let (connector, watcher, mut rx, tx_hash) = observed(15, config()).await?;
    connector.add_receipt(tx_hash, 100, true);

    // When
    for number in 101..=114 {
        header(&watcher, number, Finality::Latest).await?;
    }

    // Then
    assert!(rx.try_recv().is_err());
    assert_eq!(watcher.pending_count().await, 1);

    header(&watcher, 115, Finality::Latest).await?;
    let message = rx.try_recv()?;
    assert_eq!(message.tx_id, tx_hash);
    assert_eq!(message.sequence, 42);
    assert_eq!(message.nonce, 7);
    assert_eq!(message.timestamp, 1_200);
    assert_eq!(message.consistency_level, 15);
    assert_eq!(watcher.pending_count().await, 0);

    Ok(())
}

#[tokio::test]
async fn test_should_apply_min_confirmations() -> eyre::Result<()> {
    setup();
    let mut config = config();
    config.min_confirmations = 20;
    let (connector, watcher, mut rx, tx_hash) = observed(15, config).await?;
    connector.add_receipt(tx_hash, 100, true);

    header(&watcher, 115, Finality::Latest).await?;
    assert!(rx.try_recv().is_err());
    header(&watcher, 120, Finality::Latest).await?;
    assert_eq!(rx.try_recv()?.tx_id, tx_hash);

    Ok(())
}

#[tokio::test]
async fn test_should_time_out_on_persistent_receipt_errors() -> eyre::Result<()> {
    // Given
    setup();
    let (connector, watcher, mut rx, tx_hash) = observed(15, config()).await?;
    connector.fail_receipt(tx_hash, "connection reset");

    // When
    for number in 101..=159 {
        header(&watcher, number, Finality::Latest).await?;
    }

    // Then
    assert_eq!(watcher.pending_count().await, 1);
    header(&watcher, 160, Finality::Latest).await?;
    assert_eq!(watcher.pending_count().await, 0);
    assert!(rx.try_recv().is_err());

    Ok(())
}

#[tokio::test]
async fn test_should_recover_from_transient_receipt_errors() -> eyre::Result<()> {
    setup();
    let (connector, watcher, mut rx, tx_hash) = observed(15, config()).await?;
    connector.fail_receipt(tx_hash, "connection reset");

    header(&watcher, 115, Finality::Latest).await?;
    assert_eq!(watcher.pending_count().await, 1);

    connector.add_receipt(tx_hash, 100, true);
    header(&watcher, 116, Finality::Latest).await?;
    assert_eq!(rx.try_recv()?.tx_id, tx_hash);

    Ok(())
}

#[tokio::test]
async fn test_should_drop_reorged_observation() -> eyre::Result<()> {
    // Given
    setup();
    let (connector, watcher, mut rx, tx_hash) = observed(15, config()).await?;
    // the transaction was included again in block 103 after a reorg.
    connector.add_receipt(tx_hash, 103, true);

    // When
    header(&watcher, 115, Finality::Latest).await?;

    // Then
    assert_eq!(watcher.pending_count().await, 0);
    assert!(rx.try_recv().is_err());

    Ok(())
}

#[tokio::test]
async fn test_should_drop_failed_and_missing_transactions() -> eyre::Result<()> {
    setup();
    let (connector, watcher, mut rx, tx_hash) = observed(15, config()).await?;
    connector.add_receipt(tx_hash, 100, false);
    header(&watcher, 115, Finality::Latest).await?;
    assert_eq!(watcher.pending_count().await, 0);

    let (_connector, watcher, _rx, _) = observed(15, config()).await?;
    header(&watcher, 115, Finality::Latest).await?;
    assert_eq!(watcher.pending_count().await, 0);
    assert!(rx.try_recv().is_err());

    Ok(())
}

#[tokio::test]
async fn test_should_hold_until_finalized() -> eyre::Result<()> {
    // Given
    setup();
    let (connector, watcher, mut rx, tx_hash) = observed(202, config()).await?;
    connector.add_receipt(tx_hash, 100, true);

    // When
    header(&watcher, 200, Finality::Latest).await?;
    header(&watcher, 100, Finality::Safe).await?;
    header(&watcher, 99, Finality::Finalized).await?;

    // Then
    assert!(rx.try_recv().is_err());
    header(&watcher, 100, Finality::Finalized).await?;
    assert_eq!(rx.try_recv()?.consistency_level, 202);

    Ok(())
}

#[tokio::test]
async fn test_should_hold_until_safe() -> eyre::Result<()> {
    setup();
    let (connector, watcher, mut rx, tx_hash) = observed(201, config()).await?;
    connector.add_receipt(tx_hash, 100, true);

    header(&watcher, 99, Finality::Safe).await?;
    assert!(rx.try_recv().is_err());
    header(&watcher, 100, Finality::Safe).await?;
    assert_eq!(rx.try_recv()?.consistency_level, 201);

    Ok(())
}

#[tokio::test]
async fn test_should_give_up_on_finalized_after_max_wait() -> eyre::Result<()> {
    setup();
    let (connector, watcher, _rx, tx_hash) = observed(202, config()).await?;
    connector.fail_receipt(tx_hash, "connection reset");

    header(&watcher, 159, Finality::Finalized).await?;
    assert_eq!(watcher.pending_count().await, 1);
    header(&watcher, 160, Finality::Finalized).await?;
    assert_eq!(watcher.pending_count().await, 0);

    Ok(())
}

#[tokio::test]
async fn test_should_wait_additional_blocks_past_finality() -> eyre::Result<()> {
    // Given
    setup();
    let mut config = config();
    config.ccl = Some(CclConfig { contract_address: REGISTRY, enabled: Some(true) });
    let connector = Arc::new(MockConnector::default());
    connector.add_chain(0..=300, |n| n * 12);
    let mut configuration = B256::ZERO;
    configuration[0] = 1;
    configuration[1] = 202;
    configuration[3] = 10;
    connector.set_ccl_configuration(EMITTER, configuration);
    let tx_hash = random!(B256);
    connector.add_receipt(tx_hash, 100, true);
    let (watcher, mut rx) = watcher(connector, config);

    // When
    watcher.handle_log(message_log(CORE, tx_hash, 100, &event(203))).await?;
    header(&watcher, 109, Finality::Latest).await?;
    header(&watcher, 100, Finality::Finalized).await?;

    // Then
    assert!(rx.try_recv().is_err());
    header(&watcher, 110, Finality::Latest).await?;
    let message = rx.try_recv()?;
    assert_eq!(message.consistency_level, 202);
    assert_eq!(watcher.pending_count().await, 0);

    Ok(())
}

#[tokio::test]
async fn test_should_fall_back_to_finalized_without_registry() -> eyre::Result<()> {
    setup();
    let (connector, watcher, mut rx, tx_hash) = observed(203, config()).await?;
    connector.add_receipt(tx_hash, 100, true);

    header(&watcher, 150, Finality::Latest).await?;
    assert!(rx.try_recv().is_err());
    header(&watcher, 100, Finality::Finalized).await?;
    assert_eq!(rx.try_recv()?.consistency_level, 202);

    Ok(())
}
