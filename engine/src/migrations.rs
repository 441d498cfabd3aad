use std::collections::HashMap;
use std::sync::Arc;

use fetch::{BlockNumber, ChainId};
use store::Store;

use crate::queue::AsyncEntities;

/// A scheduled one-shot transformation attached to `(chainId, blockNumber)`, whose
/// input entity set is pre-loaded before the handler runs. `entity_key` is a store key
/// (`"<ref>"` or `"<ref>.<id>"`) fetched ahead of time via `Store::get`.
#[derive(Debug, Clone)]
pub struct Migration {
    pub name: String,
    pub entity_key: String,
}

/// Flattened `"<chainId>-<blockNumber>"` lookup built once at startup.
#[derive(Default)]
pub struct MigrationsIndex {
    by_block: HashMap<(ChainId, BlockNumber), Vec<Migration>>,
}

impl MigrationsIndex {
    pub fn new(migrations: impl IntoIterator<Item = (ChainId, BlockNumber, Migration)>) -> Self {
        let mut by_block: HashMap<(ChainId, BlockNumber), Vec<Migration>> = HashMap::new();
        for (chain_id, number, migration) in migrations {
            by_block.entry((chain_id, number)).or_default().push(migration);
        }
        Self { by_block }
    }

    pub fn migrations_at(&self, chain_id: ChainId, number: BlockNumber) -> &[Migration] {
        self.by_block
            .get(&(chain_id, number))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Pre-warms the entity snapshot for every migration scheduled at this block,
    /// attaching each lookup's join handle to `async_entities` so it's already
    /// in flight by the time the handler runs.
    pub fn prewarm(&self, store: Arc<Store>, chain_id: ChainId, number: BlockNumber) -> AsyncEntities {
        let mut async_entities = AsyncEntities::new();
        for (ordinal, migration) in self.migrations_at(chain_id, number).iter().enumerate() {
            let store = store.clone();
            let entity_key = migration.entity_key.clone();
            let handle = tokio::spawn(async move {
                match store.get(&entity_key).await {
                    Ok(serde_json::Value::Array(values)) => values,
                    Ok(value) => vec![value],
                    Err(_) => Vec::new(),
                }
            });
            async_entities
                .entry(migration.name.clone())
                .or_default()
                .insert(ordinal as i64, handle);
        }
        async_entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_by_chain_and_block() {
        let index = MigrationsIndex::new([(
            1,
            100,
            Migration { name: "rename-field".into(), entity_key: "widgets".into() },
        )]);

        assert_eq!(index.migrations_at(1, 100).len(), 1);
        assert_eq!(index.migrations_at(1, 101).len(), 0);
        assert_eq!(index.migrations_at(2, 100).len(), 0);
    }
}
