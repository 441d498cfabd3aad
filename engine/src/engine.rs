use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fetch::{AlloyProvider, ChainProvider};
use log::{error, info};
use store::Store;
use tokio::sync::mpsc;

use crate::config::IndexerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, EngineResult};
use crate::listener::Listener;
use crate::migrations::MigrationsIndex;
use crate::queue::BlockQueue;
use crate::staging::StagingCache;
use crate::state::EngineState;
use crate::sync::SyncOp;

/// Process-wide coordinator: owns [`EngineState`], the [`Store`], and one
/// [`Listener`]/[`Dispatcher`] pair per configured chain.
pub struct Engine {
    state: Arc<EngineState>,
    pairs: Vec<(Listener, Dispatcher)>,
    chain_ids: Vec<fetch::ChainId>,
}

impl Engine {
    pub async fn bootstrap(
        config: IndexerConfig,
        syncs: Vec<SyncOp>,
        migrations: MigrationsIndex,
    ) -> EngineResult<Self> {
        if config.chains.is_empty() {
            return Err(EngineError::NoChainsConfigured);
        }

        let flags = config.flags();
        let immutable_collections = ["blocks", "transactions", "logs"].map(String::from);
        let store = Arc::new(
            Store::connect(&config.mongo_uri, &config.mongo_db_name, flags.store_flags(), immutable_collections)
                .await?,
        );

        let staging = Arc::new(
            StagingCache::new(config.staging_root.clone(), flags)
                .await
                .map_err(|source| EngineError::FatalProvider { chain_id: 0, source: Box::new(source) })?,
        );

        let state = Arc::new(EngineState::new(
            store.clone(),
            config.start_blocks(),
            config.concurrency,
            flags,
        ));

        let migrations = Arc::new(migrations);
        let syncs = Arc::new(syncs);
        let timeout = Duration::from_secs(config.block_timeout_secs.max(1));

        let mut pairs = Vec::new();
        let mut chain_ids = Vec::new();

        for chain in &config.chains {
            state.acquire_chain_lock(chain.chain_id).await?;
            if let Some(meta) = state.load_meta(chain.chain_id).await {
                if let Some(latest) = meta.latest_processed_block {
                    state.advance_latest_block(chain.chain_id, latest);
                }
            }

            let provider: Arc<dyn ChainProvider> = Arc::new(
                AlloyProvider::connect(&chain.rpc_url)
                    .await
                    .map_err(|source| EngineError::FatalProvider { chain_id: chain.chain_id, source: Box::new(source) })?,
            );

            let queue = Arc::new(BlockQueue::new());
            let listener = Listener::new(
                chain.chain_id,
                provider,
                staging.clone(),
                migrations.clone(),
                queue.clone(),
                state.clone(),
            );
            let dispatcher = Dispatcher::new(
                chain.chain_id,
                queue,
                listener.clone(),
                state.clone(),
                staging.clone(),
                syncs.clone(),
                timeout,
            );

            chain_ids.push(chain.chain_id);
            pairs.push((listener, dispatcher));
        }

        Ok(Self { state, pairs, chain_ids })
    }

    /// Spawns one listener + dispatcher task pair per configured chain and joins
    /// them, propagating the first fatal error — the sole channel by which a caller
    /// learns the ingestor has stopped.
    pub async fn run(self) -> EngineResult<()> {
        let (reject_tx, mut reject_rx) = mpsc::unbounded_channel::<EngineError>();
        let mut listener_handles = Vec::new();
        let mut dispatcher_handles = Vec::new();

        for (listener, dispatcher) in self.pairs {
            let reject_listener = reject_tx.clone();
            let reject_report = reject_tx.clone();
            let reject_dispatcher = reject_tx.clone();

            let listener_handle = tokio::spawn(async move {
                if let Err(err) = listener.run(reject_listener).await {
                    let _ = reject_report.send(err);
                }
            });
            let dispatcher_handle = tokio::spawn(async move {
                dispatcher.run(reject_dispatcher).await;
            });

            listener_handles.push(listener_handle);
            dispatcher_handles.push(dispatcher_handle);
        }
        drop(reject_tx);

        let outcome = reject_rx.recv().await;

        self.state.stop_listening();

        // The listener only blocks waiting on the provider's subscription stream, never
        // on a block actually being processed, so aborting it loses nothing.
        for handle in listener_handles {
            handle.abort();
        }

        // The dispatcher may be mid-`process_entry`, with the per-block timeout as the
        // only cancellation primitive it ever honors. `stop_listening` already flipped
        // its loop condition, so joining it waits only for whatever block is currently
        // in flight (via `engine.currentProcess`) before the task exits on its own —
        // never preempting a handler partway through.
        for handle in dispatcher_handles {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    error!("dispatcher task ended abnormally during shutdown: {err}");
                }
            }
        }

        for chain_id in &self.chain_ids {
            if let Err(err) = self.state.release_chain_lock(*chain_id).await {
                error!("failed to release lock for chain {chain_id}: {err}");
            }
        }

        match outcome {
            Some(err) => Err(err),
            None => {
                info!("all listeners exited without a fatal error");
                Ok(())
            }
        }
    }

    pub async fn metrics_snapshot(&self) -> HashMap<fetch::ChainId, Option<fetch::BlockNumber>> {
        self.chain_ids.iter().map(|id| (*id, self.state.latest_block(*id))).collect()
    }
}
