use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use fetch::{BlockNumber, ChainId};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::staging::AsyncBlockParts;

/// Entities touched by a migration scheduled at this block, pre-loaded asynchronously
/// alongside staging. Keyed by migration name, then by an ordinal distinguishing
/// multiple migrations of the same name at a block.
pub type AsyncEntities = HashMap<String, HashMap<i64, JoinHandle<Vec<Value>>>>;

/// One entry in a per-chain [`BlockQueue`]. `async_parts` is the deferred reader —
/// cheap to enqueue, resolved once staging I/O completes — so dispatch overlaps
/// fetch/staging rather than blocking on it.
pub struct BlockQueueEntry {
    pub chain_id: ChainId,
    pub number: BlockNumber,
    pub cancelled: Arc<AtomicBool>,
    pub async_parts: JoinHandle<AsyncBlockParts>,
    pub async_entities: AsyncEntities,
}

/// FIFO queue of pending blocks for one chain. Appended to by the listener
/// (potentially from multiple provider callbacks and gap-fill synthesis); consumed by
/// exactly one dispatcher. A mutex is sufficient since there is only ever one
/// consumer.
#[derive(Default)]
pub struct BlockQueue {
    entries: Mutex<VecDeque<BlockQueueEntry>>,
}

impl BlockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_back(&self, entry: BlockQueueEntry) {
        self.entries.lock().await.push_back(entry);
    }

    /// Re-inserts at the head after a timeout or handler failure (a "restack"), so it
    /// is retried before any successor — I5.
    pub async fn push_front(&self, entry: BlockQueueEntry) {
        self.entries.lock().await.push_front(entry);
    }

    pub async fn pop_front(&self) -> Option<BlockQueueEntry> {
        self.entries.lock().await.pop_front()
    }

    pub async fn front_number(&self) -> Option<BlockNumber> {
        self.entries.lock().await.front().map(|e| e.number)
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_entry(chain_id: ChainId, number: BlockNumber) -> BlockQueueEntry {
        BlockQueueEntry {
            chain_id,
            number,
            cancelled: Arc::new(AtomicBool::new(false)),
            async_parts: tokio::spawn(async move {
                crate::staging::AsyncBlockParts::empty_for_test()
            }),
            async_entities: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn fifo_order_preserved() {
        let queue = BlockQueue::new();
        queue.push_back(fake_entry(1, 100)).await;
        queue.push_back(fake_entry(1, 101)).await;

        assert_eq!(queue.front_number().await, Some(100));
        let popped = queue.pop_front().await.unwrap();
        assert_eq!(popped.number, 100);
        assert_eq!(queue.front_number().await, Some(101));
    }

    #[tokio::test]
    async fn restack_goes_to_head() {
        let queue = BlockQueue::new();
        queue.push_back(fake_entry(1, 101)).await;
        queue.push_front(fake_entry(1, 100)).await;

        assert_eq!(queue.front_number().await, Some(100));
    }
}
