/// A parsed store key of the form `"<ref>.<id>"` or, for collection-scan `get`s, just
/// `"<ref>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKey {
    pub collection: String,
    pub id: Option<String>,
}

impl StoreKey {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('.') {
            Some((collection, id)) if !id.is_empty() => StoreKey {
                collection: collection.to_string(),
                id: Some(id.to_string()),
            },
            _ => StoreKey {
                collection: raw.to_string(),
                id: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ref_and_id() {
        let key = StoreKey::parse("blocks.123");
        assert_eq!(key.collection, "blocks");
        assert_eq!(key.id.as_deref(), Some("123"));
    }

    #[test]
    fn parses_ref_only() {
        let key = StoreKey::parse("blocks");
        assert_eq!(key.collection, "blocks");
        assert_eq!(key.id, None);
    }

    #[test]
    fn trailing_dot_is_treated_as_ref_only() {
        let key = StoreKey::parse("blocks.");
        assert_eq!(key.collection, "blocks");
        assert_eq!(key.id, None);
    }
}
