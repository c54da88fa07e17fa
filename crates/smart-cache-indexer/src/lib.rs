//! Incremental ingestion of Stylus cache-manager `InsertBid` logs and the
//! derived gas-savings aggregate.
//!
//! The pipeline discovers every program address that ever received a caching
//! bid, asks a gas oracle what each program costs with and without the cache,
//! and keeps the summed result in a durable local cache that is refreshed by
//! periodic catch-up scans over newly produced blocks.
#![allow(clippy::missing_errors_doc)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::unreachable)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![warn(clippy::indexing_slicing)]
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::indexing_slicing))]

mod macros;

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod fetcher;
mod metrics;
pub mod oracle;
pub mod reconciler;
pub mod rpc;
pub mod source;
pub mod types;
pub mod updater;

#[cfg(any(test, feature = "test"))]
pub mod test_utils;

pub use aggregate::{
    AggregateReport,
    GasAggregateCalculator,
};
pub use cache::{
    CacheEntry,
    CacheError,
    Clock,
    LocalCache,
    SystemClock,
};
pub use config::IndexerConfig;
pub use fetcher::{
    ChunkedLogFetcher,
    FetchOutcome,
    SkippedChunk,
};
pub use oracle::HttpGasOracle;
pub use reconciler::{
    Reconciliation,
    reconcile,
};
pub use rpc::{
    InsertBid,
    RpcLogSource,
};
pub use source::{
    ChainHead,
    GasOracle,
    LogSource,
    OracleError,
    SkipReason,
    SourceError,
};
pub use types::{
    BlockRange,
    GasAggregate,
    GasCost,
    LogRecord,
    ProgramAddressSet,
};
pub use updater::{
    Activation,
    CatchUpOutcome,
    IncrementalUpdater,
    IndexerError,
    IndexerEvent,
    Phase,
    Snapshot,
};
