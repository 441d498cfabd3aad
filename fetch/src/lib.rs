mod error;
mod provider;
mod range;
mod retry;
mod types;

pub mod testing;

pub use error::{FetchError, FetchResult, ProviderErrorKind};
pub use provider::{shared, AlloyProvider, BlockStream, ChainProvider};
pub use range::{create_block_ranges, fetch_block_and_receipts, txs_from_range, DiskBlockCache, RangeFetchResult};
pub use retry::{get_block_with_transactions_retrying, get_transaction_receipt_retrying};
pub use types::{BlockNumber, BlockWithTransactions, ChainId, ProviderEvent, TransactionReceipt, TxHash};
