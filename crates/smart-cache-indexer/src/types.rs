//! Plain data carried between the fetcher, reconciler, calculator and cache.

use alloy_primitives::{
    Address,
    B256,
    U256,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::BTreeSet,
    fmt,
};

/// One observed `InsertBid` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub program_address: Address,
    pub bid_amount: U256,
    pub size: u64,
}

impl LogRecord {
    /// Identity of the log on chain. Overlapping fetches may return the same
    /// log more than once; this key collapses them.
    pub fn key(&self) -> (B256, u64) {
        (self.transaction_hash, self.log_index)
    }
}

/// Inclusive block range `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    /// Returns `None` when `from > to`.
    pub fn new(from: u64, to: u64) -> Option<Self> {
        (from <= to).then_some(Self { from, to })
    }

    /// Number of blocks covered.
    pub fn len(&self) -> u64 {
        (self.to - self.from).saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, block: u64) -> bool {
        self.from <= block && block <= self.to
    }

    /// Split into sequential sub-ranges of at most `size` blocks that cover
    /// `self` exactly once. A `size` of zero is treated as one.
    pub fn chunks(&self, size: u64) -> Vec<BlockRange> {
        let size = size.max(1);
        let mut out = Vec::new();
        let mut start = self.from;
        loop {
            let end = start.saturating_add(size - 1).min(self.to);
            out.push(BlockRange {
                from: start,
                to: end,
            });
            if end == self.to {
                break;
            }
            start = end + 1;
        }
        out
    }

    /// Whether the two ranges overlap or touch.
    fn adjoins(&self, other: &BlockRange) -> bool {
        self.from <= other.to.saturating_add(1) && other.from <= self.to.saturating_add(1)
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// Sort and coalesce overlapping or adjacent ranges.
pub fn coalesce_ranges(mut ranges: Vec<BlockRange>) -> Vec<BlockRange> {
    ranges.sort();
    let mut merged: Vec<BlockRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if last.adjoins(&range) => {
                last.to = last.to.max(range.to);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Every program address observed so far, with the scan cursor.
///
/// `last_scanned_block` only moves forward and `addresses` only grows.
/// `unscanned` lists block ranges whose fetch failed and still need a retry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramAddressSet {
    pub addresses: BTreeSet<Address>,
    pub last_scanned_block: u64,
    #[serde(default)]
    pub unscanned: Vec<BlockRange>,
}

impl ProgramAddressSet {
    pub fn new(addresses: BTreeSet<Address>, last_scanned_block: u64) -> Self {
        Self {
            addresses,
            last_scanned_block,
            unscanned: Vec::new(),
        }
    }

    /// Total number of blocks waiting for a gap retry.
    pub fn unscanned_blocks(&self) -> u64 {
        self.unscanned.iter().map(BlockRange::len).sum()
    }

    /// Fold the result of a scan into the set.
    ///
    /// `found` are the addresses the scan observed, `head` the block the scan
    /// reached, `retried` the gaps that were re-fetched successfully and
    /// `failed` the ranges that are still missing. Returns the updated set and
    /// the addresses that were not known before.
    pub fn advance(
        mut self,
        head: u64,
        found: &BTreeSet<Address>,
        retried: &[BlockRange],
        failed: Vec<BlockRange>,
    ) -> (Self, BTreeSet<Address>) {
        let discovered: BTreeSet<Address> = found.difference(&self.addresses).copied().collect();
        self.addresses.extend(discovered.iter().copied());
        self.last_scanned_block = self.last_scanned_block.max(head);

        let mut unscanned: Vec<BlockRange> = self
            .unscanned
            .into_iter()
            .filter(|gap| !retried.contains(gap))
            .collect();
        unscanned.extend(failed);
        self.unscanned = coalesce_ranges(unscanned);

        (self, discovered)
    }
}

/// Gas a single program costs with and without the cache, per the oracle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasCost {
    pub gas_without_cache: u128,
    pub gas_with_cache: u128,
}

impl GasCost {
    pub fn new(gas_without_cache: u128, gas_with_cache: u128) -> Self {
        Self {
            gas_without_cache,
            gas_with_cache,
        }
    }
}

/// Sum of [`GasCost`] over all program addresses that answered.
///
/// `total_gas_saved == total_gas_without_cache - total_gas_with_cache`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasAggregate {
    pub total_gas_without_cache: u128,
    pub total_gas_with_cache: u128,
    pub total_gas_saved: u128,
}

impl GasAggregate {
    pub fn from_totals(total_gas_without_cache: u128, total_gas_with_cache: u128) -> Self {
        Self {
            total_gas_without_cache,
            total_gas_with_cache,
            total_gas_saved: total_gas_without_cache.saturating_sub(total_gas_with_cache),
        }
    }

    /// Add one program's cost to the totals.
    #[must_use]
    pub fn add(self, cost: GasCost) -> Self {
        Self::from_totals(
            self.total_gas_without_cache
                .saturating_add(cost.gas_without_cache),
            self.total_gas_with_cache.saturating_add(cost.gas_with_cache),
        )
    }
}
