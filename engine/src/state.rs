use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use fetch::{BlockNumber, ChainId};
use log::warn;
use serde::{Deserialize, Serialize};
use store::Store;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::error::EngineError;
use crate::flags::EngineFlags;

/// The `__meta__` record tracking per-chain ingest cursor + advisory lock. Always read
/// through `Store::get`, never cached-behind-`warmDb`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaEntity {
    pub id: String,
    pub chain_id: ChainId,
    pub latest_processed_block: Option<BlockNumber>,
    pub locked: bool,
}

impl MetaEntity {
    fn key_for(chain_id: ChainId) -> String {
        format!("__meta__.chain-{chain_id}")
    }
}

/// Process-wide coordination state shared by the listener and dispatcher for every
/// configured chain. Mutated only by the dispatcher.
pub struct EngineState {
    pub db: Arc<Store>,
    pub latest_blocks: DashMap<ChainId, BlockNumber>,
    pub start_blocks: HashMap<ChainId, BlockNumber>,
    pub concurrency: usize,
    pub flags: EngineFlags,
    pub listening: AtomicBool,
    pub in_sync: AtomicBool,
    pub current_process: AsyncMutex<Option<JoinHandle<()>>>,
}

impl EngineState {
    pub fn new(db: Arc<Store>, start_blocks: HashMap<ChainId, BlockNumber>, concurrency: usize, flags: EngineFlags) -> Self {
        Self {
            db,
            latest_blocks: DashMap::new(),
            start_blocks,
            concurrency,
            flags,
            listening: AtomicBool::new(true),
            in_sync: AtomicBool::new(true),
            current_process: AsyncMutex::new(None),
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn stop_listening(&self) {
        self.listening.store(false, Ordering::SeqCst);
    }

    pub fn is_in_sync(&self) -> bool {
        self.in_sync.load(Ordering::SeqCst)
    }

    pub fn start_block(&self, chain_id: ChainId) -> BlockNumber {
        self.start_blocks.get(&chain_id).copied().unwrap_or(0)
    }

    pub fn latest_block(&self, chain_id: ChainId) -> Option<BlockNumber> {
        self.latest_blocks.get(&chain_id).map(|v| *v)
    }

    pub fn advance_latest_block(&self, chain_id: ChainId, number: BlockNumber) {
        self.latest_blocks.insert(chain_id, number);
    }

    /// Loads the persisted cursor for a chain, if any (always read-through).
    pub async fn load_meta(&self, chain_id: ChainId) -> Option<MetaEntity> {
        match self.db.get(&MetaEntity::key_for(chain_id)).await {
            Ok(value) => serde_json::from_value(value).ok(),
            Err(_) => None,
        }
    }

    /// Acquires the per-chain advisory lock, failing if another ingestor already
    /// holds it. Guards against concurrent ingestors on the same chain.
    pub async fn acquire_chain_lock(&self, chain_id: ChainId) -> Result<(), EngineError> {
        if let Some(meta) = self.load_meta(chain_id).await {
            if meta.locked {
                warn!("chain {chain_id} is already locked by another ingestor");
                return Err(EngineError::ChainLocked { chain_id });
            }
        }

        let meta = MetaEntity {
            id: format!("chain-{chain_id}"),
            chain_id,
            latest_processed_block: self.latest_block(chain_id),
            locked: true,
        };
        self.db
            .put(&MetaEntity::key_for(chain_id), serde_json::to_value(meta).expect("MetaEntity always serializes"))
            .await?;
        Ok(())
    }

    /// Releases the lock with a final save of the cursor.
    pub async fn release_chain_lock(&self, chain_id: ChainId) -> Result<(), store::StoreError> {
        let meta = MetaEntity {
            id: format!("chain-{chain_id}"),
            chain_id,
            latest_processed_block: self.latest_block(chain_id),
            locked: false,
        };
        self.db.put(&MetaEntity::key_for(chain_id), serde_json::to_value(meta).expect("MetaEntity always serializes")).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use store::testing::FakeBackend;
    use store::{Store, StoreFlags};

    use super::*;

    fn state() -> EngineState {
        let store = Arc::new(Store::with_backend(Arc::new(FakeBackend::new()), StoreFlags::default(), []));
        EngineState::new(store, HashMap::new(), 1, EngineFlags::default())
    }

    #[tokio::test]
    async fn acquire_chain_lock_rejects_a_second_concurrent_ingestor() {
        let state = state();
        state.acquire_chain_lock(1).await.unwrap();

        let err = state.acquire_chain_lock(1).await.unwrap_err();
        assert!(matches!(err, EngineError::ChainLocked { chain_id: 1 }));
    }

    #[tokio::test]
    async fn release_then_reacquire_succeeds() {
        let state = state();
        state.acquire_chain_lock(1).await.unwrap();
        state.release_chain_lock(1).await.unwrap();
        state.acquire_chain_lock(1).await.unwrap();
    }
}
