use std::time::Duration;

use log::warn;

use crate::error::FetchResult;
use crate::provider::ChainProvider;
use crate::types::{BlockNumber, BlockWithTransactions, TransactionReceipt, TxHash};

const LOG_EVERY_ATTEMPTS: u32 = 10;
const BACKOFF_FLOOR: Duration = Duration::from_millis(250);
const BACKOFF_CEILING: Duration = Duration::from_secs(10);

fn backoff_for(attempt: u32) -> Duration {
    let scaled = BACKOFF_FLOOR.saturating_mul(attempt.min(32));
    scaled.min(BACKOFF_CEILING)
}

/// Retries `op` forever, logging every `LOG_EVERY_ATTEMPTS`th failure unless `silent`.
/// Transient RPC faults are expected; there is no useful partial result to surface, so
/// callers get a value back, never an error.
async fn retry_forever<T, F, Fut>(what: &str, silent: bool, mut op: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = FetchResult<Option<T>>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(Some(value)) => return value,
            Ok(None) => {}
            Err(err) => {
                if !silent && attempt % LOG_EVERY_ATTEMPTS == 0 {
                    warn!("{what} failed after {attempt} attempts: {err}");
                }
            }
        }
        tokio::time::sleep(backoff_for(attempt)).await;
    }
}

/// `getTransactionReceipt(provider, txOrHash)` — retries until a receipt with a
/// non-empty `transactionHash` is obtained. Unbounded retry is deliberate.
pub async fn get_transaction_receipt_retrying(
    provider: &dyn ChainProvider,
    hash: TxHash,
    silent: bool,
) -> TransactionReceipt {
    retry_forever(&format!("fetch receipt {hash}"), silent, || async {
        match provider.get_transaction_receipt(hash).await {
            Ok(Some(receipt)) if receipt.transaction_hash != TxHash::ZERO => Ok(Some(receipt)),
            Ok(Some(_)) => Ok(None),
            Ok(None) => Ok(None),
            Err(err) => Err(err),
        }
    })
    .await
}

/// Retries `get_block_with_transactions` forever, same policy as receipts.
pub async fn get_block_with_transactions_retrying(
    provider: &dyn ChainProvider,
    number: BlockNumber,
    silent: bool,
) -> BlockWithTransactions {
    retry_forever(&format!("fetch block {number}"), silent, || async {
        provider.get_block_with_transactions(number).await
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_floored_and_capped() {
        assert_eq!(backoff_for(0), Duration::ZERO);
        assert_eq!(backoff_for(1), BACKOFF_FLOOR);
        assert!(backoff_for(1000) <= BACKOFF_CEILING);
    }
}
