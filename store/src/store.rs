use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bson::Document;
use log::debug;
use mongodb::Client;
use serde_json::Value;

use crate::backend::{DocumentBackend, MongoBackend};
use crate::cache::HotCache;
use crate::document::{
    CollectionMode, FIELD_BLOCK_NUM, FIELD_BLOCK_TS, FIELD_CHAIN_ID, FIELD_ID, META_COLLECTION,
};
use crate::error::{StoreError, StoreResult};
use crate::flags::StoreFlags;
use crate::key::StoreKey;
use crate::metrics::{StoreMetrics, StoreMetricsSnapshot};

const MATERIALIZED_VIEW_PAGE_SIZE: i64 = 5000;

/// One operation in a [`Store::batch`] call.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put { key: String, value: Value },
    Del { key: String },
}

/// Document store over mutable and immutable collections, backed by MongoDB, with an
/// in-memory hot cache consulted ahead of every durable read.
pub struct Store {
    backend: Arc<dyn DocumentBackend>,
    cache: HotCache,
    flags: StoreFlags,
    immutable_collections: HashSet<String>,
    metrics: StoreMetrics,
}

impl Store {
    /// Connects to `uri`/`db_name` and builds a production, Mongo-backed store.
    /// `immutable_collections` names the collections that behave as append-only
    /// version histories; every other collection (besides `__meta__`, which is always
    /// mutable) is treated as mutable.
    pub async fn connect(
        uri: &str,
        db_name: &str,
        flags: StoreFlags,
        immutable_collections: impl IntoIterator<Item = String>,
    ) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(db_name);
        Ok(Self::with_backend(
            Arc::new(MongoBackend::new(db)),
            flags,
            immutable_collections,
        ))
    }

    /// Builds a store over an arbitrary [`DocumentBackend`] — production code supplies
    /// [`MongoBackend`]; tests supply `testing::FakeBackend`.
    pub fn with_backend(
        backend: Arc<dyn DocumentBackend>,
        flags: StoreFlags,
        immutable_collections: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            backend,
            cache: HotCache::new(),
            flags,
            immutable_collections: immutable_collections.into_iter().collect(),
            metrics: StoreMetrics::default(),
        }
    }

    pub fn metrics(&self) -> StoreMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn ping(&self) -> StoreResult<()> {
        self.backend.ping().await
    }

    fn mode(&self, collection: &str) -> CollectionMode {
        if collection == META_COLLECTION {
            CollectionMode::Mutable
        } else if self.immutable_collections.contains(collection) {
            CollectionMode::Immutable
        } else {
            CollectionMode::Mutable
        }
    }

    /// `get(key)` — hot cache, then `__meta__`/read-through rules, then durable read.
    pub async fn get(&self, raw_key: &str) -> StoreResult<Value> {
        let key = StoreKey::parse(raw_key);

        let Some(id) = key.id.clone() else {
            return self.get_collection(&key.collection).await;
        };

        if let Some(value) = self.cache.get(&key.collection, &id) {
            self.metrics.record_hit();
            return Ok(value);
        }
        self.metrics.record_miss();

        let reads_through = key.collection == META_COLLECTION || (!self.flags.new_db && !self.flags.warm_db);
        if reads_through {
            if let Some(document) = self.backend.find_newest_by_entity_id(&key.collection, &id).await? {
                let value = document_to_value(document)?;
                self.cache.put(&key.collection, &id, value.clone());
                return Ok(value);
            }
        }

        Err(StoreError::NotFound)
    }

    async fn get_collection(&self, collection: &str) -> StoreResult<Value> {
        if !self.flags.new_db && !self.flags.warm_db {
            let documents = match self.mode(collection) {
                CollectionMode::Immutable => {
                    self.backend
                        .materialized_view(collection, MATERIALIZED_VIEW_PAGE_SIZE)
                        .await?
                }
                CollectionMode::Mutable => self.backend.find_all(collection).await?,
            };
            let values = documents
                .into_iter()
                .map(document_to_value)
                .collect::<StoreResult<Vec<_>>>()?;
            return Ok(Value::Array(values));
        }

        if let Some(values) = self.cache.collection_values(collection) {
            return Ok(Value::Array(values));
        }

        Err(StoreError::NotFound)
    }

    /// `put(key, value)` — updates the hot cache unconditionally; writes through to
    /// Mongo unless `readOnly` is set.
    pub async fn put(&self, raw_key: &str, value: Value) -> StoreResult<()> {
        let key = StoreKey::parse(raw_key);
        let id = key
            .id
            .clone()
            .ok_or_else(|| StoreError::InvalidKey(format!("put requires an id: {}", raw_key)))?;

        self.cache.put(&key.collection, &id, value.clone());
        self.metrics.record_put();

        if self.flags.read_only {
            debug!("read-only: skipping durable write for {}.{}", key.collection, id);
            return Ok(());
        }

        let (filter, document) = self.prepare_write(&key.collection, &id, &value)?;
        self.backend.replace_one(&key.collection, filter, document).await
    }

    /// `del(key)` — removes the hot-cache entry; if not `readOnly`, deletes only the
    /// newest version for that `id`. Never deletes history wholesale.
    pub async fn del(&self, raw_key: &str) -> StoreResult<()> {
        let key = StoreKey::parse(raw_key);
        let id = key
            .id
            .clone()
            .ok_or_else(|| StoreError::InvalidKey(format!("del requires an id: {}", raw_key)))?;

        self.cache.del(&key.collection, &id);
        self.metrics.record_del();

        if self.flags.read_only {
            return Ok(());
        }

        if let Some(document) = self.backend.find_newest_by_entity_id(&key.collection, &id).await? {
            if let Some(object_id) = document.get("_id") {
                self.backend
                    .delete_by_object_id(&key.collection, object_id.clone())
                    .await?;
            }
        }
        Ok(())
    }

    /// `batch(ops)` — groups by collection, updates the hot cache synchronously
    /// during assembly, then issues one unordered write per collection.
    pub async fn batch(&self, ops: Vec<BatchOp>) -> StoreResult<()> {
        self.metrics.record_batch();

        let mut by_collection: HashMap<String, Vec<BatchOp>> = HashMap::new();
        for op in ops {
            let raw_key = match &op {
                BatchOp::Put { key, .. } => key,
                BatchOp::Del { key } => key,
            };
            let parsed = StoreKey::parse(raw_key);
            let id = parsed
                .id
                .clone()
                .ok_or_else(|| StoreError::InvalidKey(format!("batch op requires an id: {}", raw_key)))?;

            match &op {
                BatchOp::Put { value, .. } => self.cache.put(&parsed.collection, &id, value.clone()),
                BatchOp::Del { .. } => self.cache.del(&parsed.collection, &id),
            }
            by_collection.entry(parsed.collection).or_default().push(op);
        }

        if self.flags.read_only {
            return Ok(());
        }

        let writes = by_collection
            .into_iter()
            .map(|(collection, ops)| self.apply_collection_batch(collection, ops));
        futures::future::try_join_all(writes).await?;
        Ok(())
    }

    async fn apply_collection_batch(&self, collection: String, ops: Vec<BatchOp>) -> StoreResult<()> {
        let writes = ops.into_iter().map(|op| {
            let collection = collection.clone();
            async move {
                match op {
                    BatchOp::Put { key, value } => {
                        let parsed = StoreKey::parse(&key);
                        let id = parsed.id.expect("validated during assembly");
                        let (filter, document) = self.prepare_write(&parsed.collection, &id, &value)?;
                        self.backend.replace_one(&collection, filter, document).await
                    }
                    BatchOp::Del { key } => {
                        let parsed = StoreKey::parse(&key);
                        let id = parsed.id.expect("validated during assembly");
                        self.backend.delete_many_by_entity_id(&collection, &id).await
                    }
                }
            }
        });
        futures::future::try_join_all(writes).await?;
        Ok(())
    }

    /// `update({kv})` — a bare `put` over each key; sugar over per-key `put`.
    pub async fn update(&self, kv: HashMap<String, Value>) -> StoreResult<()> {
        for (key, value) in kv {
            self.put(&key, value).await?;
        }
        Ok(())
    }

    fn prepare_write(&self, collection: &str, id: &str, value: &Value) -> StoreResult<(Document, Document)> {
        let mut document = value_to_document(value)?;
        document.remove(FIELD_ID);
        document.insert(crate::document::FIELD_ENTITY_ID, id);

        let filter = match self.mode(collection) {
            CollectionMode::Mutable => {
                bson::doc! { crate::document::FIELD_ENTITY_ID: id }
            }
            CollectionMode::Immutable => {
                let mut filter = bson::doc! { crate::document::FIELD_ENTITY_ID: id };
                for field in [FIELD_BLOCK_TS, FIELD_BLOCK_NUM, FIELD_CHAIN_ID] {
                    if let Some(v) = document.get(field) {
                        filter.insert(field, v.clone());
                    }
                }
                filter
            }
        };
        Ok((filter, document))
    }
}

fn value_to_document(value: &Value) -> StoreResult<Document> {
    match value {
        Value::Object(_) => Ok(bson::to_document(value)?),
        _ => Err(StoreError::NotADocument),
    }
}

fn document_to_value(document: Document) -> StoreResult<Value> {
    Ok(bson::from_document(document)?)
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use serde_json::json;

    use super::*;
    use crate::document::FIELD_ENTITY_ID;
    use crate::testing::FakeBackend;

    #[tokio::test]
    async fn mutable_put_is_idempotent_and_cache_reads_latest_value() {
        let backend = Arc::new(FakeBackend::new());
        let store = Store::with_backend(backend.clone(), StoreFlags::default(), []);

        let v = json!({"_block_ts": 5, "name": "only"});
        store.put("widgets.1", v.clone()).await.unwrap();
        store.put("widgets.1", v).await.unwrap();

        let all = backend.find_all("widgets").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(store.get("widgets.1").await.unwrap()["name"], "only");
    }

    #[tokio::test]
    async fn immutable_versions_both_persist_and_get_returns_latest() {
        let backend = Arc::new(FakeBackend::new());
        let store = Store::with_backend(backend.clone(), StoreFlags::default(), ["blocks".to_string()]);

        store.put("blocks.1", json!({"_block_ts": 1, "value": "old"})).await.unwrap();
        store.put("blocks.1", json!({"_block_ts": 2, "value": "new"})).await.unwrap();

        let all = backend.find_all("blocks").await.unwrap();
        assert_eq!(all.len(), 2, "both versions persist in an immutable collection");

        // A cold store sharing the same backend but an empty hot cache must read
        // through and resolve to the highest `_block_ts` version.
        let cold = Store::with_backend(backend, StoreFlags::default(), ["blocks".to_string()]);
        assert_eq!(cold.get("blocks.1").await.unwrap()["value"], "new");
    }

    #[tokio::test]
    async fn batch_matches_sequential_application() {
        async fn seeded(backend: Arc<FakeBackend>) -> Store {
            let store = Store::with_backend(backend, StoreFlags::default(), []);
            store.put("widgets.c", json!({"name": "c"})).await.unwrap();
            store
        }

        let backend_batch = Arc::new(FakeBackend::new());
        let store_batch = seeded(backend_batch.clone()).await;
        store_batch
            .batch(vec![
                BatchOp::Put { key: "widgets.a".into(), value: json!({"name": "a"}) },
                BatchOp::Put { key: "widgets.b".into(), value: json!({"name": "b"}) },
                BatchOp::Del { key: "widgets.c".into() },
            ])
            .await
            .unwrap();

        let backend_seq = Arc::new(FakeBackend::new());
        let store_seq = seeded(backend_seq.clone()).await;
        store_seq.put("widgets.a", json!({"name": "a"})).await.unwrap();
        store_seq.put("widgets.b", json!({"name": "b"})).await.unwrap();
        store_seq.del("widgets.c").await.unwrap();

        let mut batch_docs = backend_batch.find_all("widgets").await.unwrap();
        let mut seq_docs = backend_seq.find_all("widgets").await.unwrap();
        for docs in [&mut batch_docs, &mut seq_docs] {
            docs.sort_by_key(|d| d.get_str(FIELD_ENTITY_ID).unwrap().to_string());
        }
        assert_eq!(batch_docs.len(), 2);
        assert_eq!(batch_docs, seq_docs);
    }

    #[tokio::test]
    async fn read_only_skips_durable_writes_but_updates_cache() {
        let backend = Arc::new(FakeBackend::new());
        let flags = StoreFlags { read_only: true, ..Default::default() };
        let store = Store::with_backend(backend.clone(), flags, []);

        store.put("widgets.1", json!({"name": "a"})).await.unwrap();
        assert!(backend.find_all("widgets").await.unwrap().is_empty());
        assert_eq!(store.get("widgets.1").await.unwrap()["name"], "a");

        store.del("widgets.1").await.unwrap();
        assert!(matches!(store.get("widgets.1").await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn materialized_view_returns_one_record_per_id_at_latest_version() {
        let backend = Arc::new(FakeBackend::new());
        let store = Store::with_backend(backend, StoreFlags::default(), ["events".to_string()]);

        store.put("events.1", json!({"_block_ts": 1, "v": "a-old"})).await.unwrap();
        store.put("events.1", json!({"_block_ts": 2, "v": "a-new"})).await.unwrap();
        store.put("events.2", json!({"_block_ts": 1, "v": "b"})).await.unwrap();

        let view = store.get("events").await.unwrap();
        let records = view.as_array().unwrap();
        assert_eq!(records.len(), 2);

        let by_id: HashMap<String, Value> = records
            .iter()
            .map(|r| (r[FIELD_ENTITY_ID].as_str().unwrap().to_string(), r["v"].clone()))
            .collect();
        assert_eq!(by_id["1"], json!("a-new"));
        assert_eq!(by_id["2"], json!("b"));
    }

    #[tokio::test]
    async fn warm_db_serves_collection_reads_from_cache_only() {
        let backend = Arc::new(FakeBackend::new());
        // Seeded directly on the backend, bypassing the store/cache entirely.
        backend
            .replace_one(
                "widgets",
                doc! { FIELD_ENTITY_ID: "1" },
                doc! { FIELD_ENTITY_ID: "1", "name": "from-backend" },
            )
            .await
            .unwrap();

        let flags = StoreFlags { warm_db: true, ..Default::default() };
        let store = Store::with_backend(backend, flags, []);

        assert!(matches!(store.get("widgets").await, Err(StoreError::NotFound)));

        store.put("widgets.2", json!({"name": "from-cache"})).await.unwrap();
        let view = store.get("widgets").await.unwrap();
        assert_eq!(view.as_array().unwrap().len(), 1, "only the cache-resident record is served");
    }
}
