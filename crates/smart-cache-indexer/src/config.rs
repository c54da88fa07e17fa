//! Tunables for the ingestion pipeline.

use crate::cache::DEFAULT_CACHE_EXPIRY;
use std::time::Duration;

/// Pacing, batching and timeout settings shared by the fetcher, the gas
/// calculator and the updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    /// First block that can contain bid events (the contract deployment block).
    pub genesis_block: u64,
    /// Width of the sub-ranges used when a full-range log query is rejected.
    pub chunk_size: u64,
    /// Pause between two chunk requests.
    pub chunk_delay: Duration,
    /// Width of the recent range tried first on an initial scan.
    pub recent_window: u64,
    /// Oracle queries issued concurrently per batch.
    pub oracle_batch_size: usize,
    /// Pause between two oracle batches.
    pub oracle_batch_delay: Duration,
    /// Upper bound for a single chunk fetch, oracle call or head query.
    pub request_timeout: Duration,
    /// Interval between catch-up cycles while a consumer is active.
    pub poll_interval: Duration,
    /// Lifetime of the durable cache entries.
    pub cache_expiry: Duration,
    /// Recorded gaps retried per catch-up cycle.
    pub max_gap_retries_per_cycle: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            genesis_block: 0,
            chunk_size: 10_000,
            chunk_delay: Duration::from_millis(100),
            recent_window: 100_000,
            oracle_batch_size: 3,
            oracle_batch_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(60),
            cache_expiry: DEFAULT_CACHE_EXPIRY,
            max_gap_retries_per_cycle: 8,
        }
    }
}
