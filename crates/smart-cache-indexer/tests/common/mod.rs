//! Shared wiring for the ingestion scenarios.

#![allow(dead_code)]

use alloy_primitives::Address;
use smart_cache_indexer::{
    GasOracle,
    IncrementalUpdater,
    IndexerConfig,
    LocalCache,
    test_utils::{
        ManualClock,
        MockChainHead,
        MockLogSource,
    },
};
use std::{
    sync::Arc,
    time::Duration,
};
use wiremock::{
    Mock,
    MockServer,
    ResponseTemplate,
    matchers::{
        method,
        query_param,
    },
};

pub const EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

pub struct TestCtx {
    pub source: Arc<MockLogSource>,
    pub chain: Arc<MockChainHead>,
    pub cache: Arc<LocalCache>,
    pub clock: Arc<ManualClock>,
    pub updater: Arc<IncrementalUpdater>,
}

/// Pacing disabled, chunks of ten blocks.
pub fn fast_config() -> IndexerConfig {
    IndexerConfig {
        chunk_size: 10,
        chunk_delay: Duration::ZERO,
        oracle_batch_delay: Duration::ZERO,
        ..IndexerConfig::default()
    }
}

/// Cache backed by a temporary sled database.
pub fn sled_cache(clock: Arc<ManualClock>) -> Arc<LocalCache> {
    let db = sled::Config::tmp().unwrap().open().unwrap();
    Arc::new(LocalCache::new_with_clock(db, EXPIRY, clock))
}

pub fn setup(source: MockLogSource, head: u64, oracle: Arc<dyn GasOracle>) -> TestCtx {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let cache = sled_cache(clock.clone());
    setup_with_cache(source, head, oracle, cache, clock)
}

pub fn setup_with_cache(
    source: MockLogSource,
    head: u64,
    oracle: Arc<dyn GasOracle>,
    cache: Arc<LocalCache>,
    clock: Arc<ManualClock>,
) -> TestCtx {
    let source = Arc::new(source);
    let chain = Arc::new(MockChainHead::new(head));
    let updater = Arc::new(IncrementalUpdater::new(
        source.clone(),
        chain.clone(),
        oracle,
        cache.clone(),
        fast_config(),
    ));
    TestCtx {
        source,
        chain,
        cache,
        clock,
        updater,
    }
}

/// Serve `(gasWithoutCache, gasWithCache)` for `program` from `server`.
pub async fn mount_gas_cost(server: &MockServer, program: Address, without: u64, with: u64) {
    Mock::given(method("GET"))
        .and(query_param("address", program.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "gasWithoutCache": without,
            "gasWithCache": with,
        })))
        .mount(server)
        .await;
}
