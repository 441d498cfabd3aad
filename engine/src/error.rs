use miette::Diagnostic;
use thiserror::Error;

/// Errors surfaced across the ingestion core. Most faults are recovered locally
/// (fetch retries forever, per-block faults restack); the variants here are the ones
/// that propagate out of `Engine::run` — the sole channel by which a caller learns the
/// ingestor has stopped.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("provider reported a fatal error on chain {chain_id}")]
    FatalProvider {
        chain_id: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Store(#[from] store::StoreError),

    #[error("listener task for chain {chain_id} panicked or was cancelled")]
    ListenerJoin {
        chain_id: u64,
        #[source]
        source: tokio::task::JoinError,
    },

    #[error("no chains configured")]
    NoChainsConfigured,

    #[error("chain {chain_id} is already locked by another ingestor")]
    ChainLocked { chain_id: u64 },
}

pub type EngineResult<T> = Result<T, EngineError>;
