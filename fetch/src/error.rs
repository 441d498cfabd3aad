use thiserror::Error;

/// Classification of a provider-level fault, mirrored from the ethers/alloy error
/// taxonomy. `Listener::on_error` in the `engine` crate matches on this to decide
/// between swallowing, logging, or surfacing through `errorHandlers.reject`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Network,
    Server,
    UnsupportedOperation,
    Timeout,
    Other,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error talking to the provider")]
    Transport {
        kind: ProviderErrorKind,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A receipt was returned with an empty `transactionHash`. Treated identically to
    /// a transport error by callers: retried forever.
    #[error("receipt for {0} is missing its transaction hash")]
    Integrity(String),
}

impl FetchError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            FetchError::Transport { kind, .. } => *kind,
            FetchError::Integrity(_) => ProviderErrorKind::Other,
        }
    }

    pub fn transport(kind: ProviderErrorKind, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        FetchError::Transport { kind, source: Box::new(source) }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
