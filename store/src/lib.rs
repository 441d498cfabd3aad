mod backend;
mod cache;
mod document;
mod error;
mod flags;
mod key;
mod metrics;
mod store;

pub mod testing;

pub use backend::{DocumentBackend, MongoBackend};
pub use document::{CollectionMode, FIELD_BLOCK_NUM, FIELD_BLOCK_TS, FIELD_CHAIN_ID, FIELD_ID, META_COLLECTION};
pub use error::{StoreError, StoreResult};
pub use flags::StoreFlags;
pub use key::StoreKey;
pub use metrics::StoreMetricsSnapshot;
pub use store::{BatchOp, Store};
