use std::collections::HashMap;

use futures::stream::{self, StreamExt};

use crate::provider::ChainProvider;
use crate::retry::{get_block_with_transactions_retrying, get_transaction_receipt_retrying};
use crate::types::{BlockNumber, BlockWithTransactions, ChainId, TransactionReceipt, TxHash};

/// Partitions `[from, to]` (inclusive) into at most `parts` contiguous sub-ranges of
/// roughly equal size. Shared between the live listener's staging fetch and the
/// historical back-fill planner.
pub fn create_block_ranges(from: BlockNumber, to: BlockNumber, parts: usize) -> Vec<(BlockNumber, BlockNumber)> {
    assert!(parts > 0, "create_block_ranges requires at least one part");
    if from > to {
        return Vec::new();
    }

    let total = to - from + 1;
    let parts = parts as u64;
    let chunk = total.div_ceil(parts);

    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = (start + chunk - 1).min(to);
        ranges.push((start, end));
        start = end + 1;
    }
    ranges
}

/// Fetches a block with its transactions and, if `collect_receipts`, every transaction
/// receipt for it, bounded to `concurrency` in-flight receipt fetches at once. Both
/// legs retry forever on transport error.
pub async fn fetch_block_and_receipts(
    provider: &dyn ChainProvider,
    number: BlockNumber,
    collect_receipts: bool,
    concurrency: usize,
    silent: bool,
) -> (BlockWithTransactions, HashMap<TxHash, TransactionReceipt>) {
    let block = get_block_with_transactions_retrying(provider, number, silent).await;

    if !collect_receipts {
        return (block, HashMap::new());
    }

    let hashes: Vec<TxHash> = block.transactions.hashes().collect();
    let receipts: HashMap<TxHash, TransactionReceipt> = stream::iter(hashes)
        .map(|hash| async move {
            let receipt = get_transaction_receipt_retrying(provider, hash, silent).await;
            (hash, receipt)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    (block, receipts)
}

#[allow(unused)]
pub type PerChainRange = (ChainId, BlockNumber, BlockNumber);

/// Disk-resident block lookup consulted by [`txs_from_range`] before going over the
/// network. Implemented in the `engine` crate by the staging cache — this crate has no
/// notion of a scratch directory of its own.
#[async_trait::async_trait]
pub trait DiskBlockCache: Send + Sync {
    async fn cached_block(&self, chain_id: ChainId, number: BlockNumber) -> Option<BlockWithTransactions>;
}

/// One fetched block's transactions and (if collected) receipts.
pub struct RangeFetchResult {
    pub block: BlockWithTransactions,
    pub receipts: HashMap<TxHash, TransactionReceipt>,
}

/// Fetches every block in `[from, to]`, consulting `cache` first: a cached block is
/// reused without a network round-trip as long as receipts aren't required. Otherwise
/// the block (and, if `collect_receipts`, every receipt) is fetched and retried forever
/// through [`fetch_block_and_receipts`]. The range is partitioned via
/// [`create_block_ranges`] into ten sub-ranges processed concurrently, bounded to
/// `concurrency` in flight at a time.
pub async fn txs_from_range(
    chain_id: ChainId,
    provider: &dyn ChainProvider,
    cache: &dyn DiskBlockCache,
    from: BlockNumber,
    to: BlockNumber,
    collect_receipts: bool,
    concurrency: usize,
    silent: bool,
) -> HashMap<BlockNumber, RangeFetchResult> {
    let sub_ranges = create_block_ranges(from, to, 10);

    let per_range: Vec<Vec<(BlockNumber, RangeFetchResult)>> = stream::iter(sub_ranges)
        .map(|(start, end)| async move {
            let mut out = Vec::new();
            for number in start..=end {
                if let Some(cached) = cache.cached_block(chain_id, number).await {
                    if !collect_receipts {
                        out.push((number, RangeFetchResult { block: cached, receipts: HashMap::new() }));
                        continue;
                    }
                }

                let (block, receipts) =
                    fetch_block_and_receipts(provider, number, collect_receipts, concurrency, silent).await;
                out.push((number, RangeFetchResult { block, receipts }));
            }
            out
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    per_range.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_evenly() {
        let ranges = create_block_ranges(0, 99, 10);
        assert_eq!(ranges.len(), 10);
        assert_eq!(ranges[0], (0, 9));
        assert_eq!(ranges[9], (90, 99));
    }

    #[test]
    fn partitions_uneven_ranges_without_gaps_or_overlap() {
        let ranges = create_block_ranges(0, 24, 10);
        assert!(ranges.len() <= 10);
        let mut expected_start = 0;
        for (start, end) in &ranges {
            assert_eq!(*start, expected_start);
            assert!(end >= start);
            expected_start = end + 1;
        }
        assert_eq!(expected_start, 25);
    }

    #[test]
    fn single_block_range() {
        assert_eq!(create_block_ranges(5, 5, 10), vec![(5, 5)]);
    }

    #[test]
    fn empty_range_when_from_after_to() {
        assert_eq!(create_block_ranges(10, 5, 10), Vec::new());
    }
}
