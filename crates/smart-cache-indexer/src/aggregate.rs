//! Gas-savings aggregation over the per-program gas oracle.

use crate::{
    config::IndexerConfig,
    metrics,
    source::{
        GasOracle,
        SkipReason,
        bounded,
    },
    types::{
        GasAggregate,
        GasCost,
    },
};
use alloy_primitives::Address;
use futures::future::join_all;
use std::{
    sync::Arc,
    time::Duration,
};
use tracing::{
    debug,
    info,
    warn,
};

/// Result of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateReport {
    /// Sum over the addresses that answered.
    pub aggregate: GasAggregate,
    pub succeeded: usize,
    pub failed: Vec<(Address, SkipReason)>,
}

impl AggregateReport {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed.len()
    }

    /// No oracle call succeeded. The aggregate is all-zero and must not be
    /// presented as real data.
    pub fn is_total_failure(&self) -> bool {
        self.succeeded == 0
    }
}

/// Queries the gas oracle in small concurrent batches and sums the answers.
pub struct GasAggregateCalculator {
    oracle: Arc<dyn GasOracle>,
    batch_size: usize,
    batch_delay: Duration,
    request_timeout: Duration,
}

impl GasAggregateCalculator {
    pub fn new(oracle: Arc<dyn GasOracle>, config: &IndexerConfig) -> Self {
        Self {
            oracle,
            batch_size: config.oracle_batch_size.max(1),
            batch_delay: config.oracle_batch_delay,
            request_timeout: config.request_timeout,
        }
    }

    /// Sum the gas costs of `addresses`.
    ///
    /// Calls within a batch run concurrently; batches run one after another
    /// with `batch_delay` between them. A failed or timed-out call is left out
    /// of the sum and listed in [`AggregateReport::failed`].
    pub async fn compute(&self, addresses: &[Address]) -> AggregateReport {
        let mut report = AggregateReport::default();
        let batches = addresses.chunks(self.batch_size);
        let total_batches = batches.len();

        for (index, batch) in batches.enumerate() {
            if index > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }

            let results = join_all(batch.iter().map(|address| self.query(*address))).await;

            for (address, result) in batch.iter().zip(results) {
                match result {
                    Ok(cost) => {
                        report.aggregate = report.aggregate.add(cost);
                        report.succeeded += 1;
                    }
                    Err(reason) => {
                        warn!(
                            target: "smart_cache_indexer::aggregate",
                            %address,
                            %reason,
                            "Gas oracle call failed, excluding address"
                        );
                        report.failed.push((*address, reason));
                    }
                }
            }

            debug!(
                target: "smart_cache_indexer::aggregate",
                batch = index + 1,
                total_batches,
                "Processed oracle batch"
            );
        }

        metrics::record_oracle_results(report.succeeded, report.failed.len());
        info!(
            target: "smart_cache_indexer::aggregate",
            succeeded = report.succeeded,
            failed = report.failed.len(),
            total_gas_saved = report.aggregate.total_gas_saved,
            "Gas aggregate computed"
        );

        report
    }

    async fn query(&self, address: Address) -> Result<GasCost, SkipReason> {
        bounded(self.request_timeout, self.oracle.gas_cost(address)).await
    }
}
