//! An in-memory [`DocumentBackend`] used to exercise `Store`'s resolution-order rules
//! without a live Mongo instance.

use std::collections::HashMap;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use tokio::sync::Mutex;

use crate::backend::DocumentBackend;
use crate::document::{FIELD_BLOCK_TS, FIELD_ENTITY_ID};
use crate::error::StoreResult;

#[derive(Default)]
pub struct FakeBackend {
    collections: Mutex<HashMap<String, Vec<Document>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(document: &Document, filter: &Document) -> bool {
        filter.iter().all(|(k, v)| document.get(k) == Some(v))
    }

    fn block_ts(document: &Document) -> i64 {
        document
            .get_i64(FIELD_BLOCK_TS)
            .unwrap_or(i64::MIN)
    }
}

#[async_trait]
impl DocumentBackend for FakeBackend {
    async fn find_newest_by_entity_id(
        &self,
        collection: &str,
        id: &str,
    ) -> StoreResult<Option<Document>> {
        let collections = self.collections.lock().await;
        let newest = collections
            .get(collection)
            .into_iter()
            .flatten()
            .filter(|document| document.get_str(FIELD_ENTITY_ID).ok() == Some(id))
            .max_by_key(|document| Self::block_ts(document))
            .cloned();
        Ok(newest)
    }

    async fn find_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let collections = self.collections.lock().await;
        Ok(collections.get(collection).cloned().unwrap_or_default())
    }

    async fn materialized_view(&self, collection: &str, _page_size: i64) -> StoreResult<Vec<Document>> {
        let collections = self.collections.lock().await;
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut latest: HashMap<String, &Document> = HashMap::new();
        for document in documents {
            let Ok(id) = document.get_str(FIELD_ENTITY_ID) else {
                continue;
            };
            latest
                .entry(id.to_string())
                .and_modify(|current| {
                    if Self::block_ts(document) > Self::block_ts(current) {
                        *current = document;
                    }
                })
                .or_insert(document);
        }

        let mut ids: Vec<&String> = latest.keys().collect();
        ids.sort();
        Ok(ids.into_iter().map(|id| latest[id].clone()).collect())
    }

    async fn replace_one(&self, collection: &str, filter: Document, mut document: Document) -> StoreResult<()> {
        let mut collections = self.collections.lock().await;
        let entries = collections.entry(collection.to_string()).or_default();

        if let Some(existing) = entries.iter_mut().find(|candidate| Self::matches(candidate, &filter)) {
            if let Some(object_id) = existing.get("_id").cloned() {
                document.insert("_id", object_id);
            }
            *existing = document;
        } else {
            document.insert("_id", Bson::ObjectId(bson::oid::ObjectId::new()));
            for (key, value) in filter.iter() {
                document.entry(key.clone()).or_insert_with(|| value.clone());
            }
            entries.push(document);
        }
        Ok(())
    }

    async fn delete_by_object_id(&self, collection: &str, object_id: Bson) -> StoreResult<()> {
        let mut collections = self.collections.lock().await;
        if let Some(entries) = collections.get_mut(collection) {
            entries.retain(|document| document.get("_id") != Some(&object_id));
        }
        Ok(())
    }

    async fn delete_many_by_entity_id(&self, collection: &str, id: &str) -> StoreResult<()> {
        let mut collections = self.collections.lock().await;
        if let Some(entries) = collections.get_mut(collection) {
            entries.retain(|document| document.get_str(FIELD_ENTITY_ID).ok() != Some(id));
        }
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replace_one_upserts_by_filter() {
        let backend = FakeBackend::new();
        backend
            .replace_one("widgets", doc! { FIELD_ENTITY_ID: "1" }, doc! { FIELD_ENTITY_ID: "1", "name": "a" })
            .await
            .unwrap();
        backend
            .replace_one("widgets", doc! { FIELD_ENTITY_ID: "1" }, doc! { FIELD_ENTITY_ID: "1", "name": "b" })
            .await
            .unwrap();

        let all = backend.find_all("widgets").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get_str("name").unwrap(), "b");
    }

    #[tokio::test]
    async fn materialized_view_keeps_latest_per_id() {
        let backend = FakeBackend::new();
        backend
            .replace_one(
                "widgets",
                doc! { FIELD_ENTITY_ID: "1", FIELD_BLOCK_TS: 1i64 },
                doc! { FIELD_ENTITY_ID: "1", FIELD_BLOCK_TS: 1i64, "name": "old" },
            )
            .await
            .unwrap();
        backend
            .replace_one(
                "widgets",
                doc! { FIELD_ENTITY_ID: "1", FIELD_BLOCK_TS: 2i64 },
                doc! { FIELD_ENTITY_ID: "1", FIELD_BLOCK_TS: 2i64, "name": "new" },
            )
            .await
            .unwrap();

        let view = backend.materialized_view("widgets", 5000).await.unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].get_str("name").unwrap(), "new");
    }
}
