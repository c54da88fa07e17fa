#![cfg(any(test, feature = "test"))]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::missing_panics_doc)]

//! In-memory doubles for the upstream services.

use crate::{
    cache::Clock,
    source::{
        ChainHead,
        GasOracle,
        LogSource,
        OracleError,
        SourceError,
    },
    types::{
        BlockRange,
        GasCost,
        LogRecord,
    },
};
use alloy_primitives::{
    Address,
    B256,
    U256,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::atomic::{
        AtomicU64,
        AtomicUsize,
        Ordering,
    },
    time::Duration,
};

/// Deterministic program address for tests.
pub fn program(n: u64) -> Address {
    Address::left_padding_from(&n.to_be_bytes())
}

/// Deterministic transaction hash for tests.
pub fn tx_hash(n: u64) -> B256 {
    B256::left_padding_from(&n.to_be_bytes())
}

/// An `InsertBid` record at `block`, emitted by transaction `tx` at `log_index`.
pub fn bid(block: u64, tx: u64, log_index: u64, program_address: Address) -> LogRecord {
    LogRecord {
        block_number: block,
        transaction_hash: tx_hash(tx),
        log_index,
        program_address,
        bid_amount: U256::from(1_000_000u64),
        size: 24_576,
    }
}

fn overlaps(a: &BlockRange, b: &BlockRange) -> bool {
    a.from <= b.to && b.from <= a.to
}

/// Log source backed by a vector of records.
///
/// Can reject ranges wider than a limit, fail or stall on chosen ranges, and
/// records every range it was asked for.
#[derive(Debug, Default)]
pub struct MockLogSource {
    logs: Mutex<Vec<LogRecord>>,
    max_range: Option<u64>,
    failing: Mutex<Vec<BlockRange>>,
    stalled: Vec<BlockRange>,
    calls: Mutex<Vec<BlockRange>>,
}

impl MockLogSource {
    pub fn new(logs: Vec<LogRecord>) -> Self {
        Self {
            logs: Mutex::new(logs),
            ..Self::default()
        }
    }

    /// Reject requests spanning more than `max` blocks.
    #[must_use]
    pub fn with_max_range(mut self, max: u64) -> Self {
        self.max_range = Some(max);
        self
    }

    /// Fail every request that touches `range`.
    #[must_use]
    pub fn with_failing_range(self, range: BlockRange) -> Self {
        self.failing.lock().push(range);
        self
    }

    /// Never answer requests that touch `range`.
    #[must_use]
    pub fn with_stalled_range(mut self, range: BlockRange) -> Self {
        self.stalled.push(range);
        self
    }

    pub fn push_log(&self, record: LogRecord) {
        self.logs.lock().push(record);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    /// Ranges requested so far, in order.
    pub fn calls(&self) -> Vec<BlockRange> {
        self.calls.lock().clone()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl LogSource for MockLogSource {
    async fn get_logs(&self, range: BlockRange) -> Result<Vec<LogRecord>, SourceError> {
        self.calls.lock().push(range);

        if let Some(max) = self.max_range
            && range.len() > max
        {
            return Err(SourceError::RangeRejected(
                range,
                format!("block range exceeds {max}"),
            ));
        }

        if self.stalled.iter().any(|stalled| overlaps(stalled, &range)) {
            std::future::pending::<()>().await;
        }

        if self.failing.lock().iter().any(|failing| overlaps(failing, &range)) {
            return Err(SourceError::Rpc("simulated failure".to_string()));
        }

        Ok(self
            .logs
            .lock()
            .iter()
            .filter(|record| range.contains(record.block_number))
            .cloned()
            .collect())
    }
}

/// Chain head that returns whatever the test sets.
#[derive(Debug, Default)]
pub struct MockChainHead {
    head: AtomicU64,
    failing: Mutex<bool>,
}

impl MockChainHead {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            failing: Mutex::new(false),
        }
    }

    pub fn set(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

#[async_trait]
impl ChainHead for MockChainHead {
    async fn block_number(&self) -> Result<u64, SourceError> {
        if *self.failing.lock() {
            return Err(SourceError::Rpc("head unavailable".to_string()));
        }
        Ok(self.head.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone, Copy)]
enum OracleAnswer {
    Cost(GasCost),
    Fail,
    Stall,
}

/// Gas oracle with per-address scripted answers.
#[derive(Debug, Default)]
pub struct MockGasOracle {
    answers: Mutex<HashMap<Address, OracleAnswer>>,
    default: Option<GasCost>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockGasOracle {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cost(self, address: Address, cost: GasCost) -> Self {
        self.set_cost(address, cost);
        self
    }

    /// Answer `500` for `address`.
    #[must_use]
    pub fn with_failure(self, address: Address) -> Self {
        self.answers.lock().insert(address, OracleAnswer::Fail);
        self
    }

    #[must_use]
    pub fn with_stalled(self, address: Address) -> Self {
        self.answers.lock().insert(address, OracleAnswer::Stall);
        self
    }

    /// Answer `cost` for addresses without a scripted answer.
    #[must_use]
    pub fn with_default(mut self, cost: GasCost) -> Self {
        self.default = Some(cost);
        self
    }

    pub fn set_cost(&self, address: Address, cost: GasCost) {
        self.answers.lock().insert(address, OracleAnswer::Cost(cost));
    }

    pub fn fail_all(&self) {
        let mut answers = self.answers.lock();
        for answer in answers.values_mut() {
            *answer = OracleAnswer::Fail;
        }
    }

    /// Number of oracle calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GasOracle for MockGasOracle {
    async fn gas_cost(&self, program: Address) -> Result<GasCost, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        // let the other calls of the batch start
        tokio::task::yield_now().await;

        let answer = self.answers.lock().get(&program).copied();
        let result = match (answer, self.default) {
            (Some(OracleAnswer::Cost(cost)), _) | (None, Some(cost)) => Ok(cost),
            (Some(OracleAnswer::Fail), _) => Err(OracleError::Status(500)),
            (Some(OracleAnswer::Stall), _) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return std::future::pending().await;
            }
            (None, None) => Err(OracleError::InvalidResponse(format!(
                "unknown program {program}"
            ))),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: u64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
