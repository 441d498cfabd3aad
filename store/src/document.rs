/// The one collection name that is always mutable and always read through, regardless
/// of `newDb`/`warmDb`.
pub const META_COLLECTION: &str = "__meta__";

pub const FIELD_ID: &str = "_id";
pub const FIELD_BLOCK_TS: &str = "_block_ts";
pub const FIELD_BLOCK_NUM: &str = "_block_num";
pub const FIELD_CHAIN_ID: &str = "_chain_id";

/// The `id` values stored in a collection are unique under mutable mode; immutable
/// collections additionally key a version by `(_block_ts, _block_num, _chain_id)`.
pub const FIELD_ENTITY_ID: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionMode {
    Mutable,
    Immutable,
}
