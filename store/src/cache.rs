use dashmap::DashMap;
use serde_json::Value;

/// `map<collection, map<id, record>>`, consulted before any durable read and updated
/// unconditionally by every write, including in `readOnly` mode.
#[derive(Default)]
pub struct HotCache {
    collections: DashMap<String, DashMap<String, Value>>,
}

impl HotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Value> {
        self.collections.get(collection)?.get(id).map(|v| v.clone())
    }

    pub fn put(&self, collection: &str, id: &str, value: Value) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), value);
    }

    pub fn del(&self, collection: &str, id: &str) {
        if let Some(entries) = self.collections.get(collection) {
            entries.remove(id);
        }
    }

    /// Returns `None` if the collection has never been touched by a put, which lets
    /// `get` distinguish "empty collection" from "collection cache doesn't exist".
    pub fn collection_values(&self, collection: &str) -> Option<Vec<Value>> {
        self.collections
            .get(collection)
            .map(|entries| entries.iter().map(|e| e.value().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_then_get_round_trips() {
        let cache = HotCache::new();
        cache.put("blocks", "1", json!({"number": 1}));
        assert_eq!(cache.get("blocks", "1"), Some(json!({"number": 1})));
    }

    #[test]
    fn del_removes_entry_but_not_collection() {
        let cache = HotCache::new();
        cache.put("blocks", "1", json!({"number": 1}));
        cache.del("blocks", "1");
        assert_eq!(cache.get("blocks", "1"), None);
        assert_eq!(cache.collection_values("blocks"), Some(vec![]));
    }

    #[test]
    fn untouched_collection_is_none() {
        let cache = HotCache::new();
        assert_eq!(cache.collection_values("blocks"), None);
    }
}
