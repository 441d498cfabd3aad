use std::collections::HashMap;

use fetch::{BlockNumber, ChainId};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::flags::EngineFlags;

/// `{ chainId, name, rpcUrl, concurrency, startBlock }` — loaded from config rather
/// than hardcoded, one struct per ingestible chain.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub name: String,
    pub rpc_url: String,
    pub start_block: BlockNumber,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IndexerConfig {
    pub chains: Vec<ChainConfig>,
    pub mongo_uri: String,
    pub mongo_db_name: String,
    pub staging_root: String,
    pub concurrency: usize,
    pub block_timeout_secs: u64,
    pub read_only: bool,
    pub new_db: bool,
    pub warm_db: bool,
    pub cleanup: bool,
    pub silent: bool,
    pub collect_blocks: bool,
    pub collect_tx_receipts: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chains: Vec::new(),
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_db_name: "indexer".to_string(),
            staging_root: "./.indexer-staging".to_string(),
            concurrency: 10,
            block_timeout_secs: 30,
            read_only: false,
            new_db: false,
            warm_db: false,
            cleanup: false,
            silent: false,
            collect_blocks: true,
            collect_tx_receipts: true,
        }
    }
}

impl IndexerConfig {
    /// CLI flags override env vars (`INDEXER_*`) override a TOML file override
    /// built-in defaults.
    pub fn figment(config_path: &str) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("INDEXER_"))
    }

    pub fn load(config_path: &str) -> figment::Result<Self> {
        Self::figment(config_path).extract()
    }

    pub fn start_blocks(&self) -> HashMap<ChainId, BlockNumber> {
        self.chains.iter().map(|c| (c.chain_id, c.start_block)).collect()
    }

    pub fn flags(&self) -> EngineFlags {
        EngineFlags {
            read_only: self.read_only,
            new_db: self.new_db,
            warm_db: self.warm_db,
            cleanup: self.cleanup,
            silent: self.silent,
            collect_blocks: self.collect_blocks,
            collect_tx_receipts: self.collect_tx_receipts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_chains() {
        let config = IndexerConfig::default();
        assert!(config.chains.is_empty());
        assert_eq!(config.concurrency, 10);
    }

    #[test]
    fn start_blocks_are_keyed_by_chain_id() {
        let mut config = IndexerConfig::default();
        config.chains.push(ChainConfig {
            chain_id: 1,
            name: "mainnet".to_string(),
            rpc_url: "https://example.invalid".to_string(),
            start_block: 100,
        });
        assert_eq!(config.start_blocks().get(&1), Some(&100));
    }
}
