//! JSON-RPC implementation of [`LogSource`] and [`ChainHead`].
//!
//! Queries `eth_getLogs` on the cache manager contract for `InsertBid`
//! events and decodes them into [`LogRecord`]s.

use crate::{
    source::{
        ChainHead,
        LogSource,
        SourceError,
    },
    types::{
        BlockRange,
        LogRecord,
    },
};
use alloy_primitives::{
    Address,
    U256,
};
use alloy_provider::{
    Provider,
    RootProvider,
};
use alloy_rpc_types::{
    Filter,
    Log,
};
use alloy_sol_types::{
    SolEvent,
    sol,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{
    trace,
    warn,
};

sol! {
    /// Emitted by the Stylus cache manager when a program is bid into the cache.
    #[derive(Debug)]
    event InsertBid(bytes32 indexed codehash, address program, uint192 bid, uint64 size);
}

/// Reads bid logs and the chain head from an RPC node.
#[derive(Debug, Clone)]
pub struct RpcLogSource {
    provider: Arc<RootProvider>,
    cache_manager: Address,
}

impl RpcLogSource {
    pub fn new(provider: Arc<RootProvider>, cache_manager: Address) -> Self {
        Self {
            provider,
            cache_manager,
        }
    }

    fn filter(&self, range: BlockRange) -> Filter {
        Filter::new()
            .address(self.cache_manager)
            .event_signature(InsertBid::SIGNATURE_HASH)
            .from_block(range.from)
            .to_block(range.to)
    }
}

#[async_trait]
impl LogSource for RpcLogSource {
    async fn get_logs(&self, range: BlockRange) -> Result<Vec<LogRecord>, SourceError> {
        let filter = self.filter(range);
        trace!(target: "smart_cache_indexer::rpc", ?filter, "Fetching logs");

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|err| classify_rpc_error(range, &err.to_string()))?;

        Ok(logs.iter().filter_map(decode_bid_log).collect())
    }
}

#[async_trait]
impl ChainHead for RpcLogSource {
    async fn block_number(&self) -> Result<u64, SourceError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|err| SourceError::Rpc(err.to_string()))
    }
}

/// Map an RPC error message onto the error kinds the fetcher reports.
fn classify_rpc_error(range: BlockRange, message: &str) -> SourceError {
    let lowered = message.to_lowercase();
    if lowered.contains("429")
        || lowered.contains("rate limit")
        || lowered.contains("too many requests")
    {
        SourceError::RateLimited
    } else if lowered.contains("range")
        || lowered.contains("too many results")
        || lowered.contains("limit exceeded")
        || lowered.contains("query returned more than")
    {
        SourceError::RangeRejected(range, message.to_string())
    } else {
        SourceError::Rpc(message.to_string())
    }
}

/// Decode one RPC log into a [`LogRecord`].
///
/// Removed (reorged) logs, pending logs without a position and logs that do
/// not decode as `InsertBid` are dropped.
pub fn decode_bid_log(log: &Log) -> Option<LogRecord> {
    if log.removed {
        trace!(target: "smart_cache_indexer::rpc", tx_hash = ?log.transaction_hash, "Dropping removed log");
        return None;
    }

    let (Some(block_number), Some(transaction_hash), Some(log_index)) =
        (log.block_number, log.transaction_hash, log.log_index)
    else {
        warn!(
            target: "smart_cache_indexer::rpc",
            tx_hash = ?log.transaction_hash,
            "Dropping log without block position"
        );
        return None;
    };

    match InsertBid::decode_log(&log.inner) {
        Ok(event) => {
            Some(LogRecord {
                block_number,
                transaction_hash,
                log_index,
                program_address: event.data.program,
                bid_amount: U256::from(event.data.bid),
                size: event.data.size,
            })
        }
        Err(err) => {
            warn!(
                target: "smart_cache_indexer::rpc",
                error = %err,
                ?transaction_hash,
                log_index,
                "Failed to decode InsertBid log, skipping"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{
        B256,
        Bytes,
        LogData,
        Uint,
        address,
        b256,
    };
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    const CACHE_MANAGER: Address = address!("0x51dedbd2f190e0696afbee5e60bfde96d86464ec");
    const PROGRAM: Address = address!("0x00000000000000000000000000000000000000aa");

    fn rpc_log(data: LogData) -> Log {
        Log {
            inner: alloy_primitives::Log {
                address: CACHE_MANAGER,
                data,
            },
            block_hash: Some(B256::repeat_byte(1)),
            block_number: Some(42),
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(2)),
            transaction_index: Some(0),
            log_index: Some(3),
            removed: false,
        }
    }

    fn insert_bid_data() -> LogData {
        InsertBid {
            codehash: B256::repeat_byte(9),
            program: PROGRAM,
            bid: Uint::<192, 3>::from(5_000u64),
            size: 1024,
        }
        .encode_log_data()
    }

    #[test]
    fn test_event_signature() {
        assert_eq!(
            InsertBid::SIGNATURE,
            "InsertBid(bytes32,address,uint192,uint64)"
        );
    }

    #[test]
    fn test_decode_bid_log() {
        let record = decode_bid_log(&rpc_log(insert_bid_data())).unwrap();
        assert_eq!(
            record,
            LogRecord {
                block_number: 42,
                transaction_hash: B256::repeat_byte(2),
                log_index: 3,
                program_address: PROGRAM,
                bid_amount: U256::from(5_000u64),
                size: 1024,
            }
        );
    }

    #[test]
    fn test_decode_drops_removed_and_unpositioned_logs() {
        let mut removed = rpc_log(insert_bid_data());
        removed.removed = true;
        assert!(decode_bid_log(&removed).is_none());

        let mut pending = rpc_log(insert_bid_data());
        pending.block_number = None;
        assert!(decode_bid_log(&pending).is_none());
    }

    #[test]
    fn test_decode_drops_foreign_event() {
        let data = LogData::new_unchecked(
            vec![b256!("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef")],
            Bytes::from(vec![0u8; 32]),
        );
        assert!(decode_bid_log(&rpc_log(data)).is_none());
    }

    #[test]
    fn test_filter_targets_cache_manager() {
        let provider = Arc::new(RootProvider::new_http(
            "http://localhost:8545".parse().unwrap(),
        ));
        let source = RpcLogSource::new(provider, CACHE_MANAGER);
        let filter = source.filter(BlockRange { from: 10, to: 20 });

        assert_eq!(filter.get_from_block(), Some(10));
        assert_eq!(filter.get_to_block(), Some(20));
        assert!(filter.address.matches(&CACHE_MANAGER));
        assert!(filter.topics[0].matches(&InsertBid::SIGNATURE_HASH));
    }

    #[test]
    fn test_classify_rpc_error() {
        let range = BlockRange { from: 0, to: 1 };
        assert_eq!(
            classify_rpc_error(range, "HTTP error 429 with body: Too Many Requests"),
            SourceError::RateLimited
        );
        assert_matches!(
            classify_rpc_error(range, "query returned more than 10000 results"),
            SourceError::RangeRejected(r, _) if r == range
        );
        assert_matches!(
            classify_rpc_error(range, "connection reset"),
            SourceError::Rpc(_)
        );
    }
}
