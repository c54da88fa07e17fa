//! Bootstrap and incremental catch-up of the program address set and the gas
//! aggregate.
//!
//! The updater owns the in-memory view served to consumers. On activation it
//! loads the durable cache (or runs a full scan when the cache is cold), then
//! periodically scans only the blocks produced since the last scan. Only one
//! cycle runs at a time; a cycle triggered while another is in flight is
//! skipped.

use crate::{
    aggregate::GasAggregateCalculator,
    cache::{
        GAS_AGGREGATE_KEY,
        LocalCache,
        PROGRAM_ADDRESSES_KEY,
    },
    config::IndexerConfig,
    critical,
    fetcher::{
        ChunkedLogFetcher,
        FetchOutcome,
    },
    metrics,
    reconciler::reconcile,
    source::{
        ChainHead,
        GasOracle,
        LogSource,
        SourceError,
    },
    types::{
        BlockRange,
        GasAggregate,
        ProgramAddressSet,
    },
};
use alloy_primitives::Address;
use parking_lot::{
    Mutex,
    RwLock,
};
use serde::Serialize;
use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{
        Instant,
        MissedTickBehavior,
        interval_at,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    info,
    warn,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Where the updater is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Nothing loaded and no cycle running.
    #[default]
    Idle,
    /// Reading the durable cache.
    Bootstrapping,
    /// Scanning from the genesis block.
    FullScan,
    /// A snapshot is available and no cycle is running.
    Serving,
    /// Scanning the blocks produced since the last scan.
    CatchingUp,
}

/// The data served to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub addresses: BTreeSet<Address>,
    pub aggregate: GasAggregate,
    pub last_scanned_block: u64,
    /// Blocks whose logs could not be fetched yet. Non-zero means the address
    /// set may be incomplete.
    pub unscanned_blocks: u64,
    /// Loaded from the durable cache and not yet confirmed by a catch-up, or
    /// the latest recomputation failed and the previous aggregate is shown.
    pub is_stale: bool,
}

/// Notifications for consumers that do not want to poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexerEvent {
    AggregateUpdated(GasAggregate),
    AddressesDiscovered(Vec<Address>),
}

/// Result of a single catch-up cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatchUpOutcome {
    /// Another cycle was in flight.
    Skipped,
    /// The chain head has not moved and there were no gaps to retry.
    UpToDate { last_scanned_block: u64 },
    /// The cursor moved; no new addresses, the aggregate was left alone.
    Advanced {
        from: u64,
        to: u64,
        retried_gaps: usize,
    },
    /// New addresses were found and the aggregate was recomputed.
    Discovered {
        to: u64,
        discovered: Vec<Address>,
        aggregate: GasAggregate,
    },
    /// New addresses were found but no oracle call succeeded. The previous
    /// aggregate is kept and marked stale.
    AggregateFailed {
        to: u64,
        discovered: Vec<Address>,
        attempted: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexerError {
    #[error("Indexer is still loading")]
    Busy,
    #[error("No snapshot loaded yet")]
    NotBootstrapped,
    #[error("Full scan found no bid events")]
    NoEvents,
    #[error("Gas analysis failed for all {attempted} programs")]
    AnalysisFailed { attempted: usize },
    #[error("Failed to read chain head: {0}")]
    ChainHead(#[source] SourceError),
}

#[derive(Debug, Clone)]
struct State {
    addresses: ProgramAddressSet,
    aggregate: GasAggregate,
    from_cache: bool,
    aggregate_failed: bool,
}

impl State {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            addresses: self.addresses.addresses.clone(),
            aggregate: self.aggregate,
            last_scanned_block: self.addresses.last_scanned_block,
            unscanned_blocks: self.addresses.unscanned_blocks(),
            is_stale: self.from_cache || self.aggregate_failed,
        }
    }
}

/// Marks a cycle in flight. Dropping it releases the in-flight flag and
/// settles the phase.
struct CycleGuard<'a> {
    updater: &'a IncrementalUpdater,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        let settled = if self.updater.state.read().is_some() {
            Phase::Serving
        } else {
            Phase::Idle
        };
        *self.updater.phase.lock() = settled;
        self.updater.busy.store(false, Ordering::Release);
    }
}

/// Keeps the program address set and gas aggregate current.
pub struct IncrementalUpdater {
    fetcher: ChunkedLogFetcher,
    calculator: GasAggregateCalculator,
    chain: Arc<dyn ChainHead>,
    cache: Arc<LocalCache>,
    config: IndexerConfig,
    state: RwLock<Option<State>>,
    busy: AtomicBool,
    phase: Mutex<Phase>,
    events: broadcast::Sender<IndexerEvent>,
}

impl IncrementalUpdater {
    pub fn new(
        source: Arc<dyn LogSource>,
        chain: Arc<dyn ChainHead>,
        oracle: Arc<dyn GasOracle>,
        cache: Arc<LocalCache>,
        config: IndexerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            fetcher: ChunkedLogFetcher::new(source, &config),
            calculator: GasAggregateCalculator::new(oracle, &config),
            chain,
            cache,
            config,
            state: RwLock::new(None),
            busy: AtomicBool::new(false),
            phase: Mutex::new(Phase::Idle),
            events,
        }
    }

    /// True while a bootstrap, full scan or catch-up is running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexerEvent> {
        self.events.subscribe()
    }

    /// The current snapshot, if one has been loaded.
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.state.read().as_ref().map(State::snapshot)
    }

    /// Serve the current snapshot, bootstrapping it first if needed.
    ///
    /// Bootstrapping uses the durable cache when both entries are live and
    /// falls back to a full scan otherwise. Fails with
    /// [`IndexerError::Busy`] while another cycle is loading the first
    /// snapshot.
    pub async fn get_cached_or_fresh(&self) -> Result<Snapshot, IndexerError> {
        if let Some(snapshot) = self.snapshot() {
            return Ok(snapshot);
        }

        let Some(guard) = self.try_begin() else {
            debug!(
                target: "smart_cache_indexer::updater",
                "Cycle already in flight, bootstrap not started"
            );
            return Err(IndexerError::Busy);
        };

        // another cycle may have finished between the check and the guard
        if let Some(snapshot) = self.snapshot() {
            return Ok(snapshot);
        }

        self.set_phase(Phase::Bootstrapping);
        if let Some(snapshot) = self.load_cached() {
            return Ok(snapshot);
        }

        self.full_scan(&guard).await
    }

    /// Rebuild everything from the genesis block, ignoring the cache.
    pub async fn force_refresh(&self) -> Result<Snapshot, IndexerError> {
        let Some(guard) = self.try_begin() else {
            debug!(
                target: "smart_cache_indexer::updater",
                "Cycle already in flight, forced refresh not started"
            );
            return Err(IndexerError::Busy);
        };
        info!(target: "smart_cache_indexer::updater", "Forced refresh requested");
        self.full_scan(&guard).await
    }

    /// Run one catch-up cycle over the blocks produced since the last scan.
    pub async fn catch_up(&self) -> Result<CatchUpOutcome, IndexerError> {
        let Some(_guard) = self.try_begin() else {
            debug!(
                target: "smart_cache_indexer::updater",
                "Cycle already in flight, skipping catch-up"
            );
            metrics::record_cycle_skipped();
            return Ok(CatchUpOutcome::Skipped);
        };

        let Some(state) = self.state.read().clone() else {
            return Err(IndexerError::NotBootstrapped);
        };
        self.set_phase(Phase::CatchingUp);

        let head = self.chain_head().await?;
        let last = state.addresses.last_scanned_block;
        let gaps: Vec<BlockRange> = state
            .addresses
            .unscanned
            .iter()
            .take(self.config.max_gap_retries_per_cycle)
            .copied()
            .collect();
        let fresh = BlockRange::new(last.saturating_add(1), head);

        if fresh.is_none() && gaps.is_empty() {
            debug!(
                target: "smart_cache_indexer::updater",
                head,
                last_scanned_block = last,
                "Chain head has not moved"
            );
            self.confirm(&state);
            return Ok(CatchUpOutcome::UpToDate {
                last_scanned_block: last,
            });
        }

        let mut fetched = FetchOutcome::default();
        for gap in &gaps {
            debug!(target: "smart_cache_indexer::updater", %gap, "Retrying unscanned range");
            fetched.merge(self.fetcher.fetch_logs(*gap).await);
        }
        if let Some(range) = fresh {
            fetched.merge(self.fetcher.fetch_logs(range).await);
        }

        let reconciliation = reconcile(&fetched.records);
        let (addresses, discovered) = state.addresses.clone().advance(
            head,
            &reconciliation.addresses,
            &gaps,
            fetched.skipped_ranges(),
        );
        let to = addresses.last_scanned_block;

        if discovered.is_empty() {
            self.persist(PROGRAM_ADDRESSES_KEY, &addresses);
            self.publish_gauges(&addresses, state.aggregate);
            info!(
                target: "smart_cache_indexer::updater",
                from = last,
                to,
                retried_gaps = gaps.len(),
                unscanned_blocks = addresses.unscanned_blocks(),
                "Catch-up found no new programs"
            );
            *self.state.write() = Some(State {
                addresses,
                from_cache: false,
                ..state
            });
            return Ok(CatchUpOutcome::Advanced {
                from: last,
                to,
                retried_gaps: gaps.len(),
            });
        }

        let discovered: Vec<Address> = discovered.into_iter().collect();
        info!(
            target: "smart_cache_indexer::updater",
            from = last,
            to,
            discovered = discovered.len(),
            "Catch-up found new programs, recomputing aggregate"
        );
        let _ = self
            .events
            .send(IndexerEvent::AddressesDiscovered(discovered.clone()));

        let all: Vec<Address> = addresses.addresses.iter().copied().collect();
        let report = self.calculator.compute(&all).await;

        if report.is_total_failure() {
            warn!(
                target: "smart_cache_indexer::updater",
                attempted = report.attempted(),
                "Aggregate recomputation failed, keeping previous aggregate"
            );
            self.persist(PROGRAM_ADDRESSES_KEY, &addresses);
            self.publish_gauges(&addresses, state.aggregate);
            *self.state.write() = Some(State {
                addresses,
                from_cache: false,
                aggregate_failed: true,
                ..state
            });
            return Ok(CatchUpOutcome::AggregateFailed {
                to,
                discovered,
                attempted: report.attempted(),
            });
        }

        let aggregate = report.aggregate;
        self.persist(PROGRAM_ADDRESSES_KEY, &addresses);
        self.persist(GAS_AGGREGATE_KEY, &aggregate);
        self.publish_gauges(&addresses, aggregate);
        *self.state.write() = Some(State {
            addresses,
            aggregate,
            from_cache: false,
            aggregate_failed: false,
        });
        let _ = self.events.send(IndexerEvent::AggregateUpdated(aggregate));

        Ok(CatchUpOutcome::Discovered {
            to,
            discovered,
            aggregate,
        })
    }

    /// Bootstrap and start the periodic catch-up task.
    ///
    /// The task stops when the returned [`Activation`] is deactivated or
    /// dropped. A cycle that is running at that point completes.
    pub fn activate(self: &Arc<Self>) -> Activation {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.clone().run(cancel.clone()));
        Activation {
            cancel,
            handle: Some(handle),
        }
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let poll_interval = self.config.poll_interval;
        let first_tick = match self.get_cached_or_fresh().await {
            // cached data is confirmed right away
            Ok(snapshot) if snapshot.is_stale => Instant::now(),
            Ok(_) => Instant::now() + poll_interval,
            Err(err) => {
                warn!(
                    target: "smart_cache_indexer::updater",
                    error = %err,
                    "Bootstrap did not produce a snapshot, retrying on next tick"
                );
                Instant::now() + poll_interval
            }
        };

        let mut ticker = interval_at(first_tick, poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        debug!(target: "smart_cache_indexer::updater", "Periodic catch-up stopped");
    }

    async fn tick(&self) {
        if self.snapshot().is_none() {
            if let Err(err) = self.get_cached_or_fresh().await {
                warn!(
                    target: "smart_cache_indexer::updater",
                    error = %err,
                    "Bootstrap retry failed"
                );
            }
            return;
        }

        match self.catch_up().await {
            Ok(outcome) => {
                debug!(target: "smart_cache_indexer::updater", ?outcome, "Catch-up cycle finished");
            }
            Err(err) => {
                warn!(
                    target: "smart_cache_indexer::updater",
                    error = %err,
                    "Catch-up cycle failed"
                );
            }
        }
    }

    fn try_begin(&self) -> Option<CycleGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard { updater: self })
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock() = phase;
    }

    /// Adopt both cache entries if they are live.
    fn load_cached(&self) -> Option<Snapshot> {
        let addresses = self.cache.read::<ProgramAddressSet>(PROGRAM_ADDRESSES_KEY)?;
        let aggregate = self.cache.read::<GasAggregate>(GAS_AGGREGATE_KEY)?;

        info!(
            target: "smart_cache_indexer::updater",
            programs = addresses.value.addresses.len(),
            last_scanned_block = addresses.value.last_scanned_block,
            "Loaded snapshot from cache"
        );

        let state = State {
            addresses: addresses.value,
            aggregate: aggregate.value,
            from_cache: true,
            aggregate_failed: false,
        };
        self.publish_gauges(&state.addresses, state.aggregate);
        let snapshot = state.snapshot();
        *self.state.write() = Some(state);
        Some(snapshot)
    }

    /// Scan `[genesis, head]`, compute the aggregate and replace the state.
    ///
    /// Nothing is written when the scan finds no events or every oracle call
    /// fails; an existing snapshot stays in place.
    async fn full_scan(&self, _guard: &CycleGuard<'_>) -> Result<Snapshot, IndexerError> {
        self.set_phase(Phase::FullScan);

        let head = self.chain_head().await?;
        let genesis = self.config.genesis_block;
        info!(target: "smart_cache_indexer::updater", genesis, head, "Starting full scan");

        let fetched = self.fetcher.fetch_initial(genesis, head).await;
        let reconciliation = reconcile(&fetched.records);

        if reconciliation.addresses.is_empty() {
            critical!(
                genesis,
                head,
                skipped_chunks = fetched.skipped.len(),
                "Full scan found no bid events"
            );
            return Err(IndexerError::NoEvents);
        }

        debug!(
            target: "smart_cache_indexer::updater",
            top = ?reconciliation.most_frequent(5),
            "Most frequently bid programs"
        );

        let (addresses, _) = ProgramAddressSet::default().advance(
            head,
            &reconciliation.addresses,
            &[],
            fetched.skipped_ranges(),
        );
        let all: Vec<Address> = addresses.addresses.iter().copied().collect();
        let report = self.calculator.compute(&all).await;

        if report.is_total_failure() {
            critical!(
                attempted = report.attempted(),
                "Gas analysis failed for every program"
            );
            return Err(IndexerError::AnalysisFailed {
                attempted: report.attempted(),
            });
        }

        let aggregate = report.aggregate;
        self.persist(PROGRAM_ADDRESSES_KEY, &addresses);
        self.persist(GAS_AGGREGATE_KEY, &aggregate);
        self.publish_gauges(&addresses, aggregate);

        info!(
            target: "smart_cache_indexer::updater",
            programs = all.len(),
            distinct_logs = reconciliation.distinct_logs,
            unscanned_blocks = addresses.unscanned_blocks(),
            total_gas_saved = aggregate.total_gas_saved,
            "Full scan complete"
        );

        let state = State {
            addresses,
            aggregate,
            from_cache: false,
            aggregate_failed: false,
        };
        let snapshot = state.snapshot();
        let previous = self.state.write().replace(state);

        let discovered: Vec<Address> = match previous {
            Some(previous) => all
                .into_iter()
                .filter(|address| !previous.addresses.addresses.contains(address))
                .collect(),
            None => all,
        };
        if !discovered.is_empty() {
            let _ = self
                .events
                .send(IndexerEvent::AddressesDiscovered(discovered));
        }
        let _ = self.events.send(IndexerEvent::AggregateUpdated(aggregate));

        Ok(snapshot)
    }

    /// Clear the from-cache mark once a catch-up has looked at the chain.
    fn confirm(&self, current: &State) {
        if current.from_cache {
            *self.state.write() = Some(State {
                from_cache: false,
                ..current.clone()
            });
        }
    }

    async fn chain_head(&self) -> Result<u64, IndexerError> {
        let limit = self.config.request_timeout;
        match tokio::time::timeout(limit, self.chain.block_number()).await {
            Ok(Ok(head)) => Ok(head),
            Ok(Err(err)) => Err(IndexerError::ChainHead(err)),
            Err(_elapsed) => {
                Err(IndexerError::ChainHead(SourceError::Rpc(format!(
                    "chain head query timed out after {limit:?}"
                ))))
            }
        }
    }

    /// Write `value` to the cache. A failed write is logged and otherwise
    /// ignored; the in-memory state stays authoritative.
    fn persist<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(err) = self.cache.write(key, value) {
            warn!(
                target: "smart_cache_indexer::updater",
                key,
                error = ?err,
                "Failed to persist cache entry"
            );
        }
    }

    fn publish_gauges(&self, addresses: &ProgramAddressSet, aggregate: GasAggregate) {
        metrics::set_last_scanned_block(addresses.last_scanned_block);
        metrics::set_program_addresses(addresses.addresses.len());
        metrics::set_unscanned_blocks(addresses.unscanned_blocks());
        metrics::set_total_gas_saved(aggregate.total_gas_saved);
    }
}

/// Handle to a running periodic catch-up task.
#[must_use = "dropping an Activation stops the periodic catch-up"]
#[derive(Debug)]
pub struct Activation {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Activation {
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop the timer and wait for a running cycle to finish.
    pub async fn deactivate(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(err) = handle.await
        {
            warn!(
                target: "smart_cache_indexer::updater",
                error = %err,
                "Periodic catch-up task ended abnormally"
            );
        }
    }
}

impl Drop for Activation {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
