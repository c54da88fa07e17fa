mod common;

use common::{
    mount_gas_cost,
    setup,
    setup_with_cache,
};
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use smart_cache_indexer::{
    BlockRange,
    CacheEntry,
    CatchUpOutcome,
    ChunkedLogFetcher,
    Clock,
    GasAggregate,
    GasCost,
    HttpGasOracle,
    ProgramAddressSet,
    SkipReason,
    SourceError,
    cache::{
        GAS_AGGREGATE_KEY,
        PROGRAM_ADDRESSES_KEY,
    },
    reconcile,
    test_utils::{
        MockGasOracle,
        MockLogSource,
        bid,
        program,
    },
};
use std::{
    collections::BTreeSet,
    sync::Arc,
    time::Duration,
};
use tracing_test::traced_test;
use wiremock::MockServer;

#[tokio::test]
async fn test_fresh_start_scans_computes_and_persists() {
    let a = program(0xa);
    let b = program(0xb);

    let server = MockServer::start().await;
    mount_gas_cost(&server, a, 1000, 200).await;
    mount_gas_cost(&server, b, 500, 500).await;
    let oracle = Arc::new(HttpGasOracle::new(&server.uri()).unwrap());

    let ctx = setup(
        MockLogSource::new(vec![bid(10, 1, 0, a), bid(11, 2, 0, b), bid(12, 3, 4, a)]),
        40,
        oracle,
    );

    let snapshot = ctx.updater.get_cached_or_fresh().await.unwrap();

    let expected = GasAggregate {
        total_gas_without_cache: 1500,
        total_gas_with_cache: 700,
        total_gas_saved: 800,
    };
    assert_eq!(snapshot.addresses, BTreeSet::from([a, b]));
    assert_eq!(snapshot.aggregate, expected);
    assert_eq!(snapshot.last_scanned_block, 40);
    assert!(!snapshot.is_stale);

    let addresses: CacheEntry<ProgramAddressSet> = ctx.cache.read(PROGRAM_ADDRESSES_KEY).unwrap();
    assert_eq!(addresses.value.addresses, BTreeSet::from([a, b]));
    assert_eq!(addresses.value.last_scanned_block, 40);
    let aggregate: CacheEntry<GasAggregate> = ctx.cache.read(GAS_AGGREGATE_KEY).unwrap();
    assert_eq!(aggregate.value, expected);
}

#[tokio::test]
async fn test_catch_up_without_new_addresses_only_moves_the_cursor() {
    let a = program(0xa);
    let b = program(0xb);
    let oracle = Arc::new(
        MockGasOracle::new()
            .with_cost(a, GasCost::new(1000, 200))
            .with_cost(b, GasCost::new(500, 500)),
    );
    let ctx = setup(
        MockLogSource::new(vec![bid(120, 9, 0, a)]),
        150,
        oracle.clone(),
    );

    let seeded_at = ctx.clock.now_millis();
    ctx.cache
        .write(
            PROGRAM_ADDRESSES_KEY,
            &ProgramAddressSet::new(BTreeSet::from([a, b]), 100),
        )
        .unwrap();
    ctx.cache
        .write(GAS_AGGREGATE_KEY, &GasAggregate::from_totals(1500, 700))
        .unwrap();
    ctx.clock.advance(Duration::from_secs(60));

    let cached = ctx.updater.get_cached_or_fresh().await.unwrap();
    assert!(cached.is_stale);
    assert_eq!(cached.last_scanned_block, 100);

    let outcome = ctx.updater.catch_up().await.unwrap();

    assert_eq!(
        outcome,
        CatchUpOutcome::Advanced {
            from: 100,
            to: 150,
            retried_gaps: 0,
        }
    );
    assert_eq!(ctx.source.calls(), vec![BlockRange { from: 101, to: 150 }]);
    assert_eq!(oracle.calls(), 0);

    let snapshot = ctx.updater.snapshot().unwrap();
    assert_eq!(snapshot.addresses, BTreeSet::from([a, b]));
    assert_eq!(snapshot.last_scanned_block, 150);
    assert!(!snapshot.is_stale);

    let addresses: CacheEntry<ProgramAddressSet> = ctx.cache.read(PROGRAM_ADDRESSES_KEY).unwrap();
    assert_eq!(addresses.value.last_scanned_block, 150);
    assert_eq!(addresses.timestamp, seeded_at + 60_000);
    let aggregate: CacheEntry<GasAggregate> = ctx.cache.read(GAS_AGGREGATE_KEY).unwrap();
    assert_eq!(aggregate.timestamp, seeded_at);
    assert_eq!(aggregate.value, GasAggregate::from_totals(1500, 700));
}

#[traced_test]
#[tokio::test]
async fn test_failed_middle_chunk_is_skipped() {
    let source = Arc::new(
        MockLogSource::new(vec![
            bid(3, 1, 0, program(1)),
            bid(14, 2, 0, program(2)),
            bid(27, 3, 0, program(3)),
        ])
        .with_max_range(10)
        .with_failing_range(BlockRange { from: 10, to: 19 }),
    );
    let fetcher = ChunkedLogFetcher::new(source.clone(), &common::fast_config());

    let outcome = fetcher.fetch_logs(BlockRange { from: 0, to: 29 }).await;

    assert_eq!(
        reconcile(&outcome.records).addresses,
        BTreeSet::from([program(1), program(3)])
    );
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].range, BlockRange { from: 10, to: 19 });
    assert_matches!(
        outcome.skipped[0].reason,
        SkipReason::Source(SourceError::Rpc(_))
    );
    assert!(logs_contain("Chunk fetch failed, skipping"));
    assert!(logs_contain("chunk=2"));
}

#[tokio::test]
async fn test_partial_scan_is_served_and_flagged() {
    let oracle = Arc::new(MockGasOracle::new().with_default(GasCost::new(100, 40)));
    let ctx = setup(
        MockLogSource::new(vec![bid(3, 1, 0, program(1)), bid(14, 2, 0, program(2))])
            .with_max_range(10)
            .with_failing_range(BlockRange { from: 10, to: 19 }),
        29,
        oracle,
    );

    let snapshot = ctx.updater.get_cached_or_fresh().await.unwrap();

    assert_eq!(snapshot.addresses, BTreeSet::from([program(1)]));
    assert_eq!(snapshot.unscanned_blocks, 10);
    let addresses: CacheEntry<ProgramAddressSet> = ctx.cache.read(PROGRAM_ADDRESSES_KEY).unwrap();
    assert_eq!(addresses.value.unscanned, vec![BlockRange { from: 10, to: 19 }]);
}

#[tokio::test]
async fn test_restart_serves_from_durable_cache() {
    let oracle = Arc::new(MockGasOracle::new().with_default(GasCost::new(100, 40)));
    let first = setup(
        MockLogSource::new(vec![bid(3, 1, 0, program(1))]),
        50,
        oracle.clone(),
    );
    let original = first.updater.get_cached_or_fresh().await.unwrap();

    let second = setup_with_cache(
        MockLogSource::new(Vec::new()),
        50,
        oracle.clone(),
        first.cache.clone(),
        first.clock.clone(),
    );
    let restored = second.updater.get_cached_or_fresh().await.unwrap();

    assert!(second.source.calls().is_empty());
    assert_eq!(oracle.calls(), 1);
    assert_eq!(restored.addresses, original.addresses);
    assert_eq!(restored.aggregate, original.aggregate);
    assert!(restored.is_stale);
}

#[tokio::test]
async fn test_force_refresh_ignores_cache() {
    let oracle = Arc::new(MockGasOracle::new().with_default(GasCost::new(100, 40)));
    let ctx = setup(
        MockLogSource::new(vec![bid(3, 1, 0, program(1))]),
        50,
        oracle.clone(),
    );
    ctx.updater.get_cached_or_fresh().await.unwrap();

    ctx.source.push_log(bid(4, 2, 0, program(2)));
    let refreshed = ctx.updater.force_refresh().await.unwrap();

    assert_eq!(refreshed.addresses, BTreeSet::from([program(1), program(2)]));
    assert_eq!(refreshed.aggregate, GasAggregate::from_totals(200, 80));
    assert_eq!(oracle.calls(), 3);
}
