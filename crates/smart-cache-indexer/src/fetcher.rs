//! Range-limited log retrieval.
//!
//! The upstream log service rejects wide ranges and fails now and then. The
//! fetcher first asks for the whole range, and on failure walks it in fixed
//! size chunks. A chunk that fails is skipped and reported in the
//! [`FetchOutcome`] instead of failing the scan.

use crate::{
    config::IndexerConfig,
    metrics,
    source::{
        LogSource,
        SkipReason,
        bounded,
    },
    types::{
        BlockRange,
        LogRecord,
    },
};
use std::{
    sync::Arc,
    time::Duration,
};
use tracing::{
    debug,
    info,
    warn,
};

/// A chunk that was left out of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedChunk {
    pub range: BlockRange,
    pub reason: SkipReason,
}

/// Logs gathered for a range, plus the chunks that could not be fetched.
///
/// `records` is unordered and may contain the same log twice when ranges
/// overlap; deduplicate with [`reconcile`](crate::reconciler::reconcile).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    pub records: Vec<LogRecord>,
    pub skipped: Vec<SkippedChunk>,
}

impl FetchOutcome {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    /// Ranges that need a retry.
    pub fn skipped_ranges(&self) -> Vec<BlockRange> {
        self.skipped.iter().map(|chunk| chunk.range).collect()
    }

    pub(crate) fn merge(&mut self, other: FetchOutcome) {
        self.records.extend(other.records);
        self.skipped.extend(other.skipped);
    }
}

/// Fetches `InsertBid` logs, splitting ranges the upstream will not serve.
pub struct ChunkedLogFetcher {
    source: Arc<dyn LogSource>,
    chunk_size: u64,
    chunk_delay: Duration,
    recent_window: u64,
    request_timeout: Duration,
}

impl ChunkedLogFetcher {
    pub fn new(source: Arc<dyn LogSource>, config: &IndexerConfig) -> Self {
        Self {
            source,
            chunk_size: config.chunk_size.max(1),
            chunk_delay: config.chunk_delay,
            recent_window: config.recent_window.max(1),
            request_timeout: config.request_timeout,
        }
    }

    /// Fetch every log in `range`.
    ///
    /// Tries the full range in one request; if the upstream refuses, walks the
    /// range chunk by chunk with a pause between requests. A range no wider
    /// than one chunk is skipped outright when its request fails.
    pub async fn fetch_logs(&self, range: BlockRange) -> FetchOutcome {
        match self.fetch_unit(range).await {
            Ok(records) => {
                debug!(
                    target: "smart_cache_indexer::fetcher",
                    %range,
                    logs = records.len(),
                    "Fetched full range in one request"
                );
                FetchOutcome {
                    records,
                    skipped: Vec::new(),
                }
            }
            Err(reason) if range.len() <= self.chunk_size => {
                // a single chunk would repeat the same request
                warn!(
                    target: "smart_cache_indexer::fetcher",
                    %range,
                    %reason,
                    "Range fetch failed, skipping"
                );
                metrics::record_chunk_skipped();
                FetchOutcome {
                    records: Vec::new(),
                    skipped: vec![SkippedChunk { range, reason }],
                }
            }
            Err(reason) => {
                debug!(
                    target: "smart_cache_indexer::fetcher",
                    %range,
                    %reason,
                    chunk_size = self.chunk_size,
                    "Full range request failed, falling back to chunks"
                );
                metrics::record_range_fallback();
                self.fetch_chunked(range).await
            }
        }
    }

    /// Walk `range` in sequential chunks. Failed chunks are skipped.
    pub async fn fetch_chunked(&self, range: BlockRange) -> FetchOutcome {
        let chunks = range.chunks(self.chunk_size);
        let total = chunks.len();
        let mut outcome = FetchOutcome::default();

        for (index, chunk) in chunks.into_iter().enumerate() {
            if index > 0 && !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }

            match self.fetch_unit(chunk).await {
                Ok(records) => {
                    debug!(
                        target: "smart_cache_indexer::fetcher",
                        range = %chunk,
                        chunk = index + 1,
                        total,
                        logs = records.len(),
                        "Fetched chunk"
                    );
                    outcome.records.extend(records);
                }
                Err(reason) => {
                    warn!(
                        target: "smart_cache_indexer::fetcher",
                        range = %chunk,
                        chunk = index + 1,
                        total,
                        %reason,
                        "Chunk fetch failed, skipping"
                    );
                    metrics::record_chunk_skipped();
                    outcome.skipped.push(SkippedChunk {
                        range: chunk,
                        reason,
                    });
                }
            }
        }

        outcome
    }

    /// First scan of `[genesis, head]`.
    ///
    /// Fetches the most recent `recent_window` blocks first, then the older
    /// part of the range if there is one. The combined result is the same as
    /// a plain [`fetch_logs`](Self::fetch_logs) over the whole range.
    pub async fn fetch_initial(&self, genesis: u64, head: u64) -> FetchOutcome {
        let Some(full) = BlockRange::new(genesis, head) else {
            return FetchOutcome::default();
        };

        let recent_from = head
            .saturating_sub(self.recent_window - 1)
            .max(genesis);
        let recent = BlockRange {
            from: recent_from,
            to: head,
        };

        let mut outcome = self.fetch_logs(recent).await;
        info!(
            target: "smart_cache_indexer::fetcher",
            range = %recent,
            logs = outcome.records.len(),
            skipped = outcome.skipped.len(),
            "Fetched recent range"
        );

        if let Some(older) = BlockRange::new(full.from, recent_from.saturating_sub(1))
            && recent_from > full.from
        {
            let older_outcome = self.fetch_logs(older).await;
            info!(
                target: "smart_cache_indexer::fetcher",
                range = %older,
                logs = older_outcome.records.len(),
                skipped = older_outcome.skipped.len(),
                "Fetched older range"
            );
            outcome.merge(older_outcome);
        }

        outcome
    }

    async fn fetch_unit(&self, range: BlockRange) -> Result<Vec<LogRecord>, SkipReason> {
        let result = bounded(self.request_timeout, self.source.get_logs(range)).await;
        if result.is_ok() {
            metrics::record_chunk_fetched();
        }
        result
    }
}
