//! Prometheus metrics for the indexer.
//!
//! Only the `metrics` facade is used here; installing an exporter is left to
//! the embedding process.

#![allow(clippy::cast_precision_loss)]

use metrics::{
    counter,
    gauge,
};

/// Record a log chunk that was fetched successfully.
///
/// Committed as a `Counter`: `smart_cache_indexer_chunks_fetched_total`
pub fn record_chunk_fetched() {
    counter!("smart_cache_indexer_chunks_fetched_total").increment(1);
}

/// Record a log chunk that failed and was skipped.
///
/// Committed as a `Counter`: `smart_cache_indexer_chunks_skipped_total`
pub fn record_chunk_skipped() {
    counter!("smart_cache_indexer_chunks_skipped_total").increment(1);
}

/// Record a full-range request that was refused and retried in chunks.
///
/// Committed as a `Counter`: `smart_cache_indexer_range_fallbacks_total`
pub fn record_range_fallback() {
    counter!("smart_cache_indexer_range_fallbacks_total").increment(1);
}

/// Record the outcome of one aggregation pass over the oracle.
///
/// Committed as `Counter`s:
/// - `smart_cache_indexer_oracle_calls_total{status="success"}`
/// - `smart_cache_indexer_oracle_calls_total{status="failure"}`
pub fn record_oracle_results(succeeded: usize, failed: usize) {
    if succeeded > 0 {
        counter!("smart_cache_indexer_oracle_calls_total", "status" => "success")
            .increment(succeeded as u64);
    }
    if failed > 0 {
        counter!("smart_cache_indexer_oracle_calls_total", "status" => "failure")
            .increment(failed as u64);
    }
}

/// Committed as a `Gauge`: `smart_cache_indexer_last_scanned_block`
pub fn set_last_scanned_block(block_number: u64) {
    gauge!("smart_cache_indexer_last_scanned_block").set(block_number as f64);
}

/// Committed as a `Gauge`: `smart_cache_indexer_program_addresses`
pub fn set_program_addresses(count: usize) {
    gauge!("smart_cache_indexer_program_addresses").set(count as f64);
}

/// Committed as a `Gauge`: `smart_cache_indexer_unscanned_blocks`
pub fn set_unscanned_blocks(count: u64) {
    gauge!("smart_cache_indexer_unscanned_blocks").set(count as f64);
}

/// Committed as a `Gauge`: `smart_cache_indexer_total_gas_saved`
pub fn set_total_gas_saved(total: u128) {
    gauge!("smart_cache_indexer_total_gas_saved").set(total as f64);
}

/// Record a cycle that was dropped because another one was still running.
///
/// Committed as a `Counter`: `smart_cache_indexer_cycles_skipped_total`
pub fn record_cycle_skipped() {
    counter!("smart_cache_indexer_cycles_skipped_total").increment(1);
}
