use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fetch::{BlockNumber, BlockWithTransactions, ChainId, TransactionReceipt, TxHash};
use serde_json::Value;
use thiserror::Error;

/// Everything `processListenerBlock` needs: the staged block, its receipts (the
/// processing stage is responsible for ordering transaction-index-then-log-index —
/// that ordering contract lives outside this crate), and any pre-warmed migration
/// entities for this block.
pub struct BlockContext {
    pub chain_id: ChainId,
    pub number: BlockNumber,
    pub block: BlockWithTransactions,
    pub receipts: HashMap<TxHash, TransactionReceipt>,
    pub migration_entities: HashMap<String, Vec<Value>>,
}

#[derive(Debug, Error)]
#[error("handler {sync_op} failed processing chain {chain_id} block {number}")]
pub struct HandlerError {
    pub sync_op: String,
    pub chain_id: ChainId,
    pub number: BlockNumber,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

/// A registered user handler. Opaque to the dispatcher beyond this call — the body is
/// an external collaborator.
#[async_trait]
pub trait BlockHandler: Send + Sync {
    async fn handle_block(&self, ctx: &BlockContext) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// A registered subscription describing which events/handlers run for a block, given a
/// concrete shape here since `attemptNextBlock` must select *something* to pass to
/// `processListenerBlock`.
pub struct SyncOp {
    pub name: String,
    pub from_block: Option<BlockNumber>,
    pub to_block: Option<BlockNumber>,
    pub handler: Arc<dyn BlockHandler>,
}

impl SyncOp {
    pub fn valid_for(&self, number: BlockNumber) -> bool {
        self.from_block.is_none_or(|from| number >= from) && self.to_block.is_none_or(|to| number <= to)
    }
}

/// Runs every sync op valid for this block, in registration order, against the same
/// `BlockContext`. The first handler failure is returned, triggering a restack rather
/// than a partial-apply-then-continue policy.
pub async fn process_listener_block(ctx: &BlockContext, syncs: &[SyncOp]) -> Result<(), HandlerError> {
    for sync_op in syncs.iter().filter(|op| op.valid_for(ctx.number)) {
        sync_op
            .handler
            .handle_block(ctx)
            .await
            .map_err(|source| HandlerError {
                sync_op: sync_op.name.clone(),
                chain_id: ctx.chain_id,
                number: ctx.number,
                source,
            })?;
    }
    Ok(())
}
