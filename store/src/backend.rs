use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::stream::TryStreamExt;
use mongodb::options::FindOptions;
use mongodb::Database;

use crate::document::FIELD_ENTITY_ID;
use crate::error::StoreResult;

/// Storage port behind [`crate::Store`]. Production code talks to Mongo through
/// [`MongoBackend`]; tests substitute [`crate::testing::FakeBackend`] so the
/// resolution-order logic in `Store` can be exercised without a live database —
/// the same seam the indexer pack uses for its storage ports.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    async fn find_newest_by_entity_id(
        &self,
        collection: &str,
        id: &str,
    ) -> StoreResult<Option<Document>>;

    async fn find_all(&self, collection: &str) -> StoreResult<Vec<Document>>;

    /// Latest-per-`id` materialised view, already paginated internally in batches of
    /// `page_size` to bound driver memory.
    async fn materialized_view(&self, collection: &str, page_size: i64) -> StoreResult<Vec<Document>>;

    async fn replace_one(&self, collection: &str, filter: Document, document: Document) -> StoreResult<()>;

    async fn delete_by_object_id(&self, collection: &str, object_id: Bson) -> StoreResult<()>;

    async fn delete_many_by_entity_id(&self, collection: &str, id: &str) -> StoreResult<()>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Production backend: a thin wrapper over a `mongodb::Database` handle.
pub struct MongoBackend {
    db: Database,
}

impl MongoBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DocumentBackend for MongoBackend {
    async fn find_newest_by_entity_id(
        &self,
        collection: &str,
        id: &str,
    ) -> StoreResult<Option<Document>> {
        let coll = self.db.collection::<Document>(collection);
        let opts = FindOptions::builder()
            .sort(doc! { crate::document::FIELD_BLOCK_TS: -1 })
            .limit(1)
            .build();
        let mut cursor = coll
            .find(doc! { FIELD_ENTITY_ID: id })
            .with_options(opts)
            .await?;
        Ok(cursor.try_next().await?)
    }

    async fn find_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let coll = self.db.collection::<Document>(collection);
        let mut cursor = coll.find(doc! {}).await?;
        let mut out = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            out.push(document);
        }
        Ok(out)
    }

    async fn materialized_view(&self, collection: &str, page_size: i64) -> StoreResult<Vec<Document>> {
        let coll = self.db.collection::<Document>(collection);
        let mut out = Vec::new();
        let mut skip: i64 = 0;
        loop {
            let pipeline = vec![
                doc! { "$sort": { FIELD_ENTITY_ID: 1, crate::document::FIELD_BLOCK_TS: -1 } },
                doc! { "$group": { "_id": format!("${FIELD_ENTITY_ID}"), "doc": { "$first": "$$ROOT" } } },
                doc! { "$replaceRoot": { "newRoot": "$doc" } },
                doc! { "$sort": { FIELD_ENTITY_ID: 1 } },
                doc! { "$skip": skip },
                doc! { "$limit": page_size },
            ];
            let mut cursor = coll.aggregate(pipeline).await?;
            let mut page_count: i64 = 0;
            while let Some(document) = cursor.try_next().await? {
                out.push(document);
                page_count += 1;
            }
            if page_count < page_size {
                break;
            }
            skip += page_size;
        }
        Ok(out)
    }

    async fn replace_one(&self, collection: &str, filter: Document, document: Document) -> StoreResult<()> {
        let coll = self.db.collection::<Document>(collection);
        coll.replace_one(filter, document).upsert(true).await?;
        Ok(())
    }

    async fn delete_by_object_id(&self, collection: &str, object_id: Bson) -> StoreResult<()> {
        let coll = self.db.collection::<Document>(collection);
        coll.delete_one(doc! { "_id": object_id }).await?;
        Ok(())
    }

    async fn delete_many_by_entity_id(&self, collection: &str, id: &str) -> StoreResult<()> {
        let coll = self.db.collection::<Document>(collection);
        coll.delete_many(doc! { FIELD_ENTITY_ID: id }).await?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}
