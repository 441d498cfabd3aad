use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use fetch::{BlockNumber, ChainId};
use log::{debug, warn};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::listener::Listener;
use crate::queue::{AsyncEntities, BlockQueue};
use crate::staging::StagingCache;
use crate::state::EngineState;
use crate::sync::{process_listener_block, BlockContext, SyncOp};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const MIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Polling interval used when the queue is empty or the engine is out of sync.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
enum ProcessingError {
    #[error("staging for chain {chain_id} block {number} never became ready")]
    StagingIncomplete { chain_id: ChainId, number: BlockNumber },

    #[error("staging join task for chain {chain_id} block {number} panicked")]
    StagingJoin {
        chain_id: ChainId,
        number: BlockNumber,
        #[source]
        source: tokio::task::JoinError,
    },

    #[error(transparent)]
    Handler(#[from] crate::sync::HandlerError),
}

/// Single consumer per chain: pulls the head of the queue, enforces sequential
/// ordering, races processing against a per-block timeout, and restacks on
/// failure/timeout.
#[derive(Clone)]
pub struct Dispatcher {
    pub chain_id: ChainId,
    queue: Arc<BlockQueue>,
    listener: Listener,
    state: Arc<EngineState>,
    staging: Arc<StagingCache>,
    syncs: Arc<Vec<SyncOp>>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        chain_id: ChainId,
        queue: Arc<BlockQueue>,
        listener: Listener,
        state: Arc<EngineState>,
        staging: Arc<StagingCache>,
        syncs: Arc<Vec<SyncOp>>,
        timeout: Duration,
    ) -> Self {
        Self { chain_id, queue, listener, state, staging, syncs, timeout: timeout.max(MIN_TIMEOUT) }
    }

    /// The dispatch loop: while the engine is listening, pulls and processes blocks
    /// when the queue is non-empty and the engine is in sync; otherwise sleeps and
    /// rechecks.
    pub async fn run(&self, reject: mpsc::UnboundedSender<EngineError>) {
        while self.state.is_listening() {
            if !self.queue.is_empty().await && self.state.is_in_sync() {
                if let Err(err) = self.attempt_next_block().await {
                    let _ = reject.send(err);
                    return;
                }
            } else {
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
        }
    }

    /// `attemptNextBlock`: gap-fills missing block numbers ahead of the head, then
    /// pops and processes it, storing the resulting task on `engine.currentProcess`
    /// and awaiting it before returning.
    async fn attempt_next_block(&self) -> Result<(), EngineError> {
        let Some(head_number) = self.queue.front_number().await else {
            return Ok(());
        };

        let gap = missing_before(head_number, self.state.latest_block(self.chain_id));
        if !gap.is_empty() {
            debug!("gap-filling chain {} blocks {}..{}", self.chain_id, gap.start, gap.end - 1);
            for missing in gap {
                self.listener.record_listener_block(missing).await;
            }
        }

        let Some(entry) = self.queue.pop_front().await else {
            return Ok(());
        };

        let this = self.clone();
        let handle = tokio::spawn(async move { this.process_entry(entry).await });

        *self.state.current_process.lock().await = Some(handle);
        let handle = self.state.current_process.lock().await.take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|source| EngineError::ListenerJoin { chain_id: self.chain_id, source })?;
        }
        Ok(())
    }

    /// Runs one queue entry: races a timeout arm (flag-only, no preemption) against
    /// the processing arm, then restacks on timeout or any handler failure.
    async fn process_entry(&self, entry: crate::queue::BlockQueueEntry) {
        let crate::queue::BlockQueueEntry { chain_id, number, cancelled, async_parts, async_entities } = entry;

        if self.should_skip(chain_id, number) {
            debug!("skipping chain {chain_id} block {number}: handled by back-fill");
            return;
        }

        let timeout_handle = {
            let cancelled = cancelled.clone();
            let timeout = self.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                cancelled.store(true, Ordering::SeqCst);
            })
        };

        let outcome = self.run_handler(chain_id, number, async_parts, async_entities).await;
        timeout_handle.abort();

        let restack_needed = needs_restack(&outcome, cancelled.load(Ordering::SeqCst));

        if let Err(err) = &outcome {
            warn!("chain {chain_id} block {number} failed processing: {err}");
        } else if restack_needed {
            warn!("chain {chain_id} block {number} exceeded its processing timeout");
        }

        if restack_needed {
            self.listener.restack_listener_block(number).await;
        } else {
            self.state.advance_latest_block(chain_id, number);
            self.staging.cleanup_after_success(chain_id, number).await;
        }
    }

    async fn run_handler(
        &self,
        chain_id: ChainId,
        number: BlockNumber,
        async_parts: tokio::task::JoinHandle<crate::staging::AsyncBlockParts>,
        async_entities: AsyncEntities,
    ) -> Result<(), ProcessingError> {
        let parts = async_parts
            .await
            .map_err(|source| ProcessingError::StagingJoin { chain_id, number, source })?;

        if !parts.is_ready() {
            return Err(ProcessingError::StagingIncomplete { chain_id, number });
        }

        let mut migration_entities = std::collections::HashMap::new();
        for (name, ordinals) in async_entities {
            let mut values = Vec::new();
            for (_, handle) in ordinals {
                if let Ok(v) = handle.await {
                    values.extend(v);
                }
            }
            migration_entities.insert(name, values);
        }

        let ctx = BlockContext {
            chain_id,
            number,
            block: parts.block.expect("checked is_ready above"),
            receipts: parts.receipts,
            migration_entities,
        };

        process_listener_block(&ctx, &self.syncs).await?;
        Ok(())
    }

    /// `processListenerBlockSafely`: a no-op for blocks the historical back-fill path
    /// owns.
    fn should_skip(&self, chain_id: ChainId, number: BlockNumber) -> bool {
        number < self.state.start_block(chain_id)
            || self.state.latest_block(chain_id).is_some_and(|latest| number < latest)
    }
}

/// Block numbers strictly between `latest` and `head_number` that the queue skipped
/// over and the listener needs to record before the head can be popped. Empty when
/// there's no cursor yet or the head is already adjacent.
fn missing_before(head_number: BlockNumber, latest: Option<BlockNumber>) -> std::ops::Range<BlockNumber> {
    match latest {
        Some(latest) if head_number > latest + 1 => (latest + 1)..head_number,
        _ => 0..0,
    }
}

/// A failed handler always restacks; a successful one restacks only if the per-block
/// timeout fired before it returned.
fn needs_restack(outcome: &Result<(), ProcessingError>, cancelled: bool) -> bool {
    match outcome {
        Ok(()) => cancelled,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_before_is_empty_with_no_cursor() {
        assert_eq!(missing_before(100, None), 0..0);
    }

    #[test]
    fn missing_before_is_empty_when_head_is_adjacent() {
        assert_eq!(missing_before(101, Some(100)), 0..0);
    }

    #[test]
    fn missing_before_spans_the_gap() {
        assert_eq!(missing_before(105, Some(100)), 101..105);
    }

    #[test]
    fn needs_restack_is_false_on_success_without_timeout() {
        assert!(!needs_restack(&Ok(()), false));
    }

    #[test]
    fn needs_restack_is_true_on_success_after_timeout() {
        assert!(needs_restack(&Ok(()), true));
    }

    #[test]
    fn needs_restack_is_true_on_any_handler_failure() {
        let err = ProcessingError::StagingIncomplete { chain_id: 1, number: 1 };
        assert!(needs_restack(&Err(err), false));
    }
}
