//! Deduplication of raw bid logs into the set of program addresses.

use crate::types::LogRecord;
use alloy_primitives::Address;
use std::collections::{
    BTreeMap,
    BTreeSet,
    HashSet,
};

/// Distinct program addresses found in a batch of logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub addresses: BTreeSet<Address>,
    /// Number of distinct logs that referenced each address. Diagnostic only.
    pub frequency: BTreeMap<Address, usize>,
    /// Number of distinct logs after deduplication.
    pub distinct_logs: usize,
}

impl Reconciliation {
    /// The `n` most frequently bid-on addresses, most frequent first.
    pub fn most_frequent(&self, n: usize) -> Vec<(Address, usize)> {
        let mut ranked: Vec<(Address, usize)> =
            self.frequency.iter().map(|(a, c)| (*a, *c)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }
}

/// Deduplicate `records` by `(transaction_hash, log_index)` and collect the
/// program addresses they reference.
pub fn reconcile(records: &[LogRecord]) -> Reconciliation {
    let mut seen = HashSet::with_capacity(records.len());
    let mut out = Reconciliation::default();

    for record in records {
        if !seen.insert(record.key()) {
            continue;
        }
        out.distinct_logs += 1;
        out.addresses.insert(record.program_address);
        *out.frequency.entry(record.program_address).or_default() += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        bid,
        program,
    };
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reconcile_empty() {
        assert_eq!(reconcile(&[]), Reconciliation::default());
    }

    #[test]
    fn test_reconcile_counts_distinct_logs() {
        let records = vec![
            bid(1, 1, 0, program(1)),
            bid(2, 2, 0, program(2)),
            bid(3, 3, 0, program(1)),
        ];

        let result = reconcile(&records);

        assert_eq!(result.addresses, BTreeSet::from([program(1), program(2)]));
        assert_eq!(result.frequency[&program(1)], 2);
        assert_eq!(result.frequency[&program(2)], 1);
        assert_eq!(result.distinct_logs, 3);
    }

    #[test]
    fn test_reconcile_is_idempotent_under_duplication() {
        let records = vec![
            bid(1, 1, 0, program(1)),
            bid(1, 1, 1, program(2)),
            bid(9, 7, 3, program(1)),
        ];
        let doubled: Vec<LogRecord> = records.iter().chain(records.iter()).cloned().collect();

        assert_eq!(reconcile(&records), reconcile(&doubled));
    }

    #[test]
    fn test_same_tx_different_log_index_is_distinct() {
        let records = vec![bid(1, 1, 0, program(1)), bid(1, 1, 1, program(1))];
        assert_eq!(reconcile(&records).frequency[&program(1)], 2);
    }

    #[test]
    fn test_most_frequent_orders_by_count() {
        let records = vec![
            bid(1, 1, 0, program(3)),
            bid(2, 2, 0, program(2)),
            bid(3, 3, 0, program(2)),
        ];
        let ranked = reconcile(&records).most_frequent(1);
        assert_eq!(ranked, vec![(program(2), 2)]);
    }
}
