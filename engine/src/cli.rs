use clap::Parser;

/// Thin CLI entrypoint: parses flags, layers them over config + env + TOML defaults,
/// and spawns the engine.
#[derive(Debug, Parser)]
#[command(name = "indexer", about = "EVM block ingestion engine")]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(long, default_value = "indexer.toml")]
    pub config: String,

    /// `chainId=name@rpcUrl[@startBlock]`, repeatable. Overrides config file chains.
    #[arg(long = "chain")]
    pub chains: Vec<String>,

    #[arg(long)]
    pub mongo_uri: Option<String>,

    #[arg(long)]
    pub concurrency: Option<usize>,

    #[arg(long = "read-only")]
    pub read_only: bool,

    #[arg(long = "new-db")]
    pub new_db: bool,

    #[arg(long = "warm-db")]
    pub warm_db: bool,

    #[arg(long)]
    pub cleanup: bool,

    #[arg(long)]
    pub silent: bool,

    /// Connects to the store and exits, reporting health.
    #[arg(long)]
    pub check: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid --chain value {0:?}, expected chainId=name@rpcUrl[@startBlock]")]
pub struct ParseChainError(String);

/// Parses one `--chain` flag into a [`crate::config::ChainConfig`].
///
/// The start block, when present, is separated from the RPC URL by an `@` rather than
/// a `:` — a URL's own port separator — so a bare `rpcUrl` with no start block is never
/// mistaken for one (e.g. `http://localhost:8545` would otherwise have its port parsed
/// as `startBlock`).
pub fn parse_chain_flag(raw: &str) -> Result<crate::config::ChainConfig, ParseChainError> {
    let (chain_id_part, rest) = raw.split_once('=').ok_or_else(|| ParseChainError(raw.to_string()))?;
    let (name, rest) = rest.split_once('@').ok_or_else(|| ParseChainError(raw.to_string()))?;
    let (rpc_url, start_block) = match rest.rsplit_once('@') {
        Some((url, block)) => {
            (url, block.parse::<fetch::BlockNumber>().map_err(|_| ParseChainError(raw.to_string()))?)
        }
        None => (rest, 0),
    };

    let chain_id = chain_id_part.parse().map_err(|_| ParseChainError(raw.to_string()))?;
    Ok(crate::config::ChainConfig {
        chain_id,
        name: name.to_string(),
        rpc_url: rpc_url.to_string(),
        start_block,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chain_with_start_block() {
        let chain = parse_chain_flag("1=mainnet@https://rpc.example@1000").unwrap();
        assert_eq!(chain.chain_id, 1);
        assert_eq!(chain.name, "mainnet");
        assert_eq!(chain.rpc_url, "https://rpc.example");
        assert_eq!(chain.start_block, 1000);
    }

    #[test]
    fn parses_chain_without_start_block() {
        let chain = parse_chain_flag("8453=base@https://base.example").unwrap();
        assert_eq!(chain.start_block, 0);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_chain_flag("not-a-chain").is_err());
    }

    #[test]
    fn a_port_bearing_url_without_a_start_block_keeps_its_port() {
        let chain = parse_chain_flag("1=mainnet@http://localhost:8545").unwrap();
        assert_eq!(chain.rpc_url, "http://localhost:8545");
        assert_eq!(chain.start_block, 0);
    }

    #[test]
    fn rejects_a_non_numeric_start_block() {
        assert!(parse_chain_flag("1=mainnet@https://rpc.example@not-a-number").is_err());
    }
}
