use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use fetch::{BlockNumber, ChainId, ChainProvider, ProviderErrorKind, ProviderEvent};
use futures::StreamExt;
use log::{debug, warn};
use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::migrations::MigrationsIndex;
use crate::queue::{BlockQueue, BlockQueueEntry};
use crate::staging::StagingCache;
use crate::state::EngineState;

/// Per-chain subscription to new block numbers. Cheap to clone (every field is an
/// `Arc`) so the dispatcher can reuse the same block-recording logic for gap-fill via
/// recursive enqueue.
#[derive(Clone)]
pub struct Listener {
    pub chain_id: ChainId,
    provider: Arc<dyn ChainProvider>,
    staging: Arc<StagingCache>,
    migrations: Arc<MigrationsIndex>,
    queue: Arc<BlockQueue>,
    state: Arc<EngineState>,
}

impl Listener {
    pub fn new(
        chain_id: ChainId,
        provider: Arc<dyn ChainProvider>,
        staging: Arc<StagingCache>,
        migrations: Arc<MigrationsIndex>,
        queue: Arc<BlockQueue>,
        state: Arc<EngineState>,
    ) -> Self {
        Self { chain_id, provider, staging, migrations, queue, state }
    }

    /// Subscribes to the provider's block stream and records every observed block
    /// (and classified error) until the stream ends or the engine stops listening.
    pub async fn run(&self, reject: mpsc::UnboundedSender<EngineError>) -> Result<(), EngineError> {
        let mut stream = self
            .provider
            .subscribe_blocks()
            .await
            .map_err(|source| EngineError::FatalProvider {
                chain_id: self.chain_id,
                source: Box::new(source),
            })?;

        while self.state.is_listening() {
            let Some(event) = stream.next().await else { break };
            match event {
                ProviderEvent::Block(number) => self.record_listener_block(number).await,
                ProviderEvent::Error(kind, message) => self.handle_provider_error(kind, message, &reject),
            }
        }
        Ok(())
    }

    /// `recordListenerBlock`: pre-warms any scheduled migration's entity snapshot,
    /// triggers staging, and appends the resulting queue entry at the tail. Also used
    /// directly by the dispatcher's gap-fill path for synthesized block numbers.
    pub async fn record_listener_block(&self, number: BlockNumber) {
        let Some(entry) = self.stage_entry(number) else { return };
        debug!("enqueued chain {} block {number}", self.chain_id);
        self.queue.push_back(entry).await;
    }

    /// Re-stages and re-enqueues a block at the queue head, so it is retried before
    /// any successor. Used by the dispatcher after a handler failure or timeout — the
    /// original queue entry's staging join handle has already been consumed, so this
    /// restarts the fetch rather than reusing stale state.
    pub async fn restack_listener_block(&self, number: BlockNumber) {
        let Some(entry) = self.stage_entry(number) else { return };
        debug!("restacked chain {} block {number}", self.chain_id);
        self.queue.push_front(entry).await;
    }

    fn stage_entry(&self, number: BlockNumber) -> Option<BlockQueueEntry> {
        if !self.state.is_listening() {
            return None;
        }

        let async_entities = self.migrations.prewarm(self.state.db.clone(), self.chain_id, number);

        let cancelled = Arc::new(AtomicBool::new(false));
        let staging = self.staging.clone();
        let provider = self.provider.clone();
        let chain_id = self.chain_id;
        let concurrency = self.state.concurrency;

        let async_parts = tokio::spawn({
            let cancelled = cancelled.clone();
            async move {
                if let Err(err) = staging
                    .save_listener_block_and_receipts(provider.as_ref(), chain_id, number, concurrency)
                    .await
                {
                    warn!("staging failed for chain {chain_id} block {number}: {err}");
                }
                staging.read_listener_block_and_receipts(chain_id, number, cancelled).await
            }
        });

        Some(BlockQueueEntry { chain_id, number, cancelled, async_parts, async_entities })
    }

    /// `createErrorHandler`: `NETWORK_ERROR`/`SERVER_ERROR`/`UNSUPPORTED_OPERATION`
    /// propagate to `reject`; `TIMEOUT` is swallowed; anything else is logged.
    fn handle_provider_error(
        &self,
        kind: ProviderErrorKind,
        message: String,
        reject: &mpsc::UnboundedSender<EngineError>,
    ) {
        match kind {
            ProviderErrorKind::Network | ProviderErrorKind::Server | ProviderErrorKind::UnsupportedOperation => {
                let _ = reject.send(EngineError::FatalProvider {
                    chain_id: self.chain_id,
                    source: message.into(),
                });
            }
            ProviderErrorKind::Timeout => {
                debug!("swallowed provider timeout on chain {}", self.chain_id);
            }
            ProviderErrorKind::Other => {
                warn!("ignored provider error on chain {}: {message}", self.chain_id);
            }
        }
    }
}
