/// Process-wide behavior switches. `read_only`/`new_db`/`warm_db` are forwarded to
/// [`store::StoreFlags`]; the rest are consumed directly by the staging cache and the
/// fetch layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineFlags {
    /// No durable store writes occur; the hot cache still updates.
    pub read_only: bool,
    /// The store skips all durable reads, serving purely from the hot cache.
    pub new_db: bool,
    /// The store serves all non-`__meta__` reads from the hot cache.
    pub warm_db: bool,
    /// Only the combined `blockAndReceipts` staging artefact is written, and it is
    /// deleted after the block is processed successfully.
    pub cleanup: bool,
    /// Suppresses the "N attempts so far" retry log lines.
    pub silent: bool,
    /// Whether `saveListenerBlockAndReceipts` fetches full block bodies at all.
    pub collect_blocks: bool,
    /// Whether `saveListenerBlockAndReceipts` fetches per-transaction receipts.
    pub collect_tx_receipts: bool,
}

impl EngineFlags {
    pub fn store_flags(&self) -> store::StoreFlags {
        store::StoreFlags {
            read_only: self.read_only,
            new_db: self.new_db,
            warm_db: self.warm_db,
        }
    }
}
