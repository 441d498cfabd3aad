//! An in-memory [`ChainProvider`] for exercising the listener/dispatcher without a
//! live RPC endpoint.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{FetchError, FetchResult, ProviderErrorKind};
use crate::provider::{BlockStream, ChainProvider};
use crate::types::{BlockNumber, BlockWithTransactions, ChainId, ProviderEvent, TransactionReceipt, TxHash};

pub struct FakeProvider {
    chain_id: ChainId,
    blocks: Mutex<HashMap<BlockNumber, BlockWithTransactions>>,
    receipts: Mutex<HashMap<TxHash, TransactionReceipt>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ProviderEvent>>>,
    event_tx: mpsc::UnboundedSender<ProviderEvent>,
}

impl FakeProvider {
    pub fn new(chain_id: ChainId) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            chain_id,
            blocks: Mutex::new(HashMap::new()),
            receipts: Mutex::new(HashMap::new()),
            events: Mutex::new(Some(event_rx)),
            event_tx,
        }
    }

    pub fn insert_block(&self, number: BlockNumber, block: BlockWithTransactions) {
        self.blocks.lock().unwrap().insert(number, block);
    }

    pub fn insert_receipt(&self, hash: TxHash, receipt: TransactionReceipt) {
        self.receipts.lock().unwrap().insert(hash, receipt);
    }

    /// Drives the test's `Provider::on("block")` callback.
    pub fn emit_block(&self, number: BlockNumber) {
        let _ = self.event_tx.send(ProviderEvent::Block(number));
    }

    pub fn emit_error(&self, kind: ProviderErrorKind, message: impl Into<String>) {
        let _ = self.event_tx.send(ProviderEvent::Error(kind, message.into()));
    }
}

#[async_trait]
impl ChainProvider for FakeProvider {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn get_block_with_transactions(
        &self,
        number: BlockNumber,
    ) -> FetchResult<Option<BlockWithTransactions>> {
        Ok(self.blocks.lock().unwrap().get(&number).cloned())
    }

    async fn get_transaction_receipt(&self, hash: TxHash) -> FetchResult<Option<TransactionReceipt>> {
        Ok(self.receipts.lock().unwrap().get(&hash).cloned())
    }

    async fn subscribe_blocks(&self) -> FetchResult<BlockStream> {
        let rx = self
            .events
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| FetchError::transport(ProviderErrorKind::Other, AlreadySubscribed))?;
        let stream = tokio_stream::wrappers::UnboundedReceiverStream::new(rx);
        Ok(Box::pin(stream))
    }
}

#[derive(Debug)]
struct AlreadySubscribed;

impl std::fmt::Display for AlreadySubscribed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FakeProvider::subscribe_blocks called more than once")
    }
}

impl std::error::Error for AlreadySubscribed {}
