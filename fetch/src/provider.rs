use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use futures::{stream, Stream};

use crate::error::{FetchError, FetchResult, ProviderErrorKind};
use crate::types::{BlockNumber, BlockWithTransactions, ChainId, ProviderEvent, TransactionReceipt, TxHash};

/// How often the live-head poll checks for a new block number.
const BLOCK_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub type BlockStream = Pin<Box<dyn Stream<Item = ProviderEvent> + Send>>;

/// Narrow surface the rest of the pipeline needs from an EVM JSON-RPC provider.
/// Production code talks to a real chain through [`AlloyProvider`]; tests substitute
/// [`crate::testing::FakeProvider`].
#[async_trait]
pub trait ChainProvider: Send + Sync {
    fn chain_id(&self) -> ChainId;

    async fn get_block_with_transactions(
        &self,
        number: BlockNumber,
    ) -> FetchResult<Option<BlockWithTransactions>>;

    async fn get_transaction_receipt(&self, hash: TxHash) -> FetchResult<Option<TransactionReceipt>>;

    /// Subscribes to newly produced block numbers. The returned stream interleaves
    /// `ProviderEvent::Block` and `ProviderEvent::Error` items exactly as the
    /// underlying transport emits `"block"`/`"error"` events.
    async fn subscribe_blocks(&self) -> FetchResult<BlockStream>;
}

/// Production provider: a thin wrapper over `alloy`'s `RootProvider`.
pub struct AlloyProvider {
    inner: RootProvider,
    chain_id: ChainId,
}

impl AlloyProvider {
    pub async fn connect(rpc_url: &str) -> FetchResult<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e: url::ParseError| FetchError::transport(ProviderErrorKind::Other, e))?;
        let inner = ProviderBuilder::new().connect_http(url);
        let chain_id = inner
            .get_chain_id()
            .await
            .map_err(|e| classify_transport(e))?;
        Ok(Self { inner, chain_id })
    }
}

#[async_trait]
impl ChainProvider for AlloyProvider {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn get_block_with_transactions(
        &self,
        number: BlockNumber,
    ) -> FetchResult<Option<BlockWithTransactions>> {
        self.inner
            .get_block_by_number(number.into())
            .full()
            .await
            .map_err(classify_transport)
    }

    async fn get_transaction_receipt(&self, hash: TxHash) -> FetchResult<Option<TransactionReceipt>> {
        self.inner
            .get_transaction_receipt(hash)
            .await
            .map_err(classify_transport)
    }

    /// Polls `eth_blockNumber` on a fixed interval rather than relying on `watch_blocks`'
    /// own stream, which retries transport faults internally and never surfaces them —
    /// the exact signal `Listener::handle_provider_error` needs to detach on a fatal
    /// provider error. A transport error yields `ProviderEvent::Error` and the loop
    /// keeps polling; the head only ever advances, so a block number no higher than the
    /// last one observed is silently skipped.
    async fn subscribe_blocks(&self) -> FetchResult<BlockStream> {
        let inner = self.inner.clone();
        let stream = stream::unfold((inner, None::<BlockNumber>), |(inner, last_seen)| async move {
            loop {
                match inner.get_block_number().await {
                    Ok(current) if last_seen.is_none_or(|seen| current > seen) => {
                        return Some((ProviderEvent::Block(current), (inner, Some(current))));
                    }
                    Ok(_) => {}
                    Err(err) => {
                        let classified = classify_transport(err);
                        let event = ProviderEvent::Error(classified.kind(), classified.to_string());
                        return Some((event, (inner, last_seen)));
                    }
                }
                tokio::time::sleep(BLOCK_POLL_INTERVAL).await;
            }
        });
        Ok(Box::pin(stream))
    }
}

fn classify_transport(err: RpcError<TransportErrorKind>) -> FetchError {
    let kind = match &err {
        RpcError::Transport(TransportErrorKind::Custom(_)) => ProviderErrorKind::Network,
        RpcError::Transport(TransportErrorKind::HttpError(http)) if http.status >= 500 => {
            ProviderErrorKind::Server
        }
        RpcError::Transport(_) => ProviderErrorKind::Network,
        RpcError::ErrorResp(_) => ProviderErrorKind::Server,
        RpcError::NullResp | RpcError::UnsupportedFeature(_) => ProviderErrorKind::UnsupportedOperation,
        RpcError::SerError(_) | RpcError::DeserError { .. } => ProviderErrorKind::Other,
        _ => ProviderErrorKind::Other,
    };
    FetchError::transport(kind, err)
}

pub fn shared(provider: impl ChainProvider + 'static) -> Arc<dyn ChainProvider> {
    Arc::new(provider)
}
