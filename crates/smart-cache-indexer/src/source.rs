//! Contracts for the remote collaborators the indexer depends on.
//!
//! The log query service, the chain head and the gas oracle are all reached
//! through these traits so the pipeline can be driven by an RPC node in
//! production and by in-memory doubles in tests.

use crate::types::{
    BlockRange,
    GasCost,
    LogRecord,
};
use alloy_primitives::Address;
use async_trait::async_trait;
use std::time::Duration;

/// Source of `InsertBid` logs for the watched contract.
///
/// Implementations are expected to return complete results for any range they
/// accept. Rejecting a range (too wide, rate limited, transport error) is
/// reported as an error and handled by the caller.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Fetch every matching log with `range.from <= block <= range.to`.
    async fn get_logs(&self, range: BlockRange) -> Result<Vec<LogRecord>, SourceError>;
}

/// Latest block number of the chain. Monotonically non-decreasing.
#[async_trait]
pub trait ChainHead: Send + Sync {
    async fn block_number(&self) -> Result<u64, SourceError>;
}

/// Per-program gas cost oracle.
#[async_trait]
pub trait GasOracle: Send + Sync {
    async fn gas_cost(&self, program: Address) -> Result<GasCost, OracleError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("RPC request failed: {0}")]
    Rpc(String),
    #[error("Range {0} rejected by upstream: {1}")]
    RangeRejected(BlockRange, String),
    #[error("Rate limited by upstream")]
    RateLimited,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("Oracle returned status {0}")]
    Status(u16),
    #[error("Invalid oracle response: {0}")]
    InvalidResponse(String),
    #[error("Invalid oracle URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Why a unit of work (one chunk, one oracle call) was left out of a result.
///
/// Units that fail are skipped rather than aborting the surrounding scan or
/// aggregation; the reasons are collected so callers can report them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkipReason {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Await `future`, converting both its error and an elapsed `limit` into a
/// [`SkipReason`].
pub(crate) async fn bounded<T, E, F>(limit: Duration, future: F) -> Result<T, SkipReason>
where
    F: std::future::Future<Output = Result<T, E>>,
    SkipReason: From<E>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result.map_err(SkipReason::from),
        Err(_elapsed) => Err(SkipReason::Timeout(limit)),
    }
}
