use std::time::Duration;

/// The maximum number of blocks retained by the block timestamp cache.
pub const BTS_MAX_BLOCKS: usize = 10_000;

/// The maximum batch size probed by the backfill coordinator.
pub const BACKFILL_MAX_BATCH_SIZE: u64 = 1_000;

/// The time window covered by the block timestamp cache after initialization.
pub const BACKFILL_WINDOW: Duration = Duration::from_secs(30 * 60);

/// The capacity of the backfill request queue.
pub const BACKFILL_REQUEST_CAPACITY: usize = 50;

/// The number of blocks past the finality target after which a pending observation whose
/// receipt keeps failing is dropped.
pub const MAX_WAIT_CONFIRMATIONS: u64 = 60;

/// The multiple of the expected confirmations after which a pending observation times out.
pub const CONFIRMATION_TIMEOUT_MULTIPLIER: u64 = 4;

/// The time to live of a cached custom consistency configuration.
pub const CCL_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// The maximum number of emitters kept in the custom consistency cache.
pub const CCL_CACHE_CAPACITY: usize = 1_000;

/// The number of retries when reading the time of a block that is not yet available.
pub const BLOCK_TIME_RETRIES: usize = 3;

/// The interval between two block time retries.
#[cfg(any(test, feature = "test-utils"))]
pub const BLOCK_TIME_RETRY_INTERVAL: Duration = Duration::from_millis(10);
/// The interval between two block time retries.
#[cfg(not(any(test, feature = "test-utils")))]
pub const BLOCK_TIME_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// The guardian set polling interval.
#[cfg(any(test, feature = "test-utils"))]
pub const GUARDIAN_SET_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// The guardian set polling interval.
#[cfg(not(any(test, feature = "test-utils")))]
pub const GUARDIAN_SET_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Timeout of a transaction receipt request.
pub const RECEIPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout of a block time request.
pub const BLOCK_TIME_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout of a query batch.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout of a backfill batch.
pub const BACKFILL_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout of a custom consistency configuration read.
pub const CCL_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout of a guardian set read.
pub const GUARDIAN_SET_TIMEOUT: Duration = Duration::from_secs(15);

/// The number of microseconds in a second, the unit of query timestamps.
pub const MICROS_PER_SECOND: u64 = 1_000_000;
