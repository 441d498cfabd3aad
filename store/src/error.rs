use thiserror::Error;

/// Errors surfaced by the [`crate::Store`] boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no document found for key")]
    NotFound,

    #[error("invalid store key: {0}")]
    InvalidKey(String),

    #[error("store value must be a JSON object to be persisted as a document")]
    NotADocument,

    #[error("mongo driver error")]
    Mongo(#[from] mongodb::error::Error),

    #[error("bson serialization error")]
    BsonSer(#[from] bson::ser::Error),

    #[error("bson deserialization error")]
    BsonDe(#[from] bson::de::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
