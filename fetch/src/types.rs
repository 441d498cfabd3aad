use alloy::rpc::types::{Block, Transaction, TransactionReceipt as AlloyReceipt};

pub type ChainId = u64;
pub type BlockNumber = u64;
pub type TxHash = alloy::primitives::B256;

/// A block fetched with its full transaction objects, same shape `eth_getBlockByNumber`
/// returns with `full_transactions=true`.
pub type BlockWithTransactions = Block<Transaction>;

pub type TransactionReceipt = AlloyReceipt;

/// Newly observed block number emitted by a chain subscription, or a classified
/// provider fault. `Listener` (in the `engine` crate) matches on this.
#[derive(Debug)]
pub enum ProviderEvent {
    Block(BlockNumber),
    Error(crate::error::ProviderErrorKind, String),
}
