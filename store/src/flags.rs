/// Store-level behavior switches, mirrored from `engine::EngineFlags` (the engine owns
/// the full flag set; the store only needs to know about the four that change its own
/// read/write behavior).
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreFlags {
    /// No durable write occurs; the hot cache still updates.
    pub read_only: bool,
    /// Skip all durable reads; serve purely from the hot cache (except `__meta__`).
    pub new_db: bool,
    /// Serve all non-`__meta__` reads from the hot cache, never reading through to Mongo.
    pub warm_db: bool,
}
