use clap::Parser;
use engine::cli::{parse_chain_flag, Cli};
use engine::{ChainConfig, Engine, IndexerConfig, Migration, MigrationsIndex};
use log::info;
use miette::IntoDiagnostic;

#[tokio::main]
async fn main() -> miette::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config: IndexerConfig = IndexerConfig::figment(&cli.config).extract().into_diagnostic()?;

    if !cli.chains.is_empty() {
        config.chains = cli
            .chains
            .iter()
            .map(|raw| parse_chain_flag(raw))
            .collect::<Result<Vec<ChainConfig>, _>>()
            .into_diagnostic()?;
    }
    if let Some(mongo_uri) = cli.mongo_uri {
        config.mongo_uri = mongo_uri;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    config.read_only |= cli.read_only;
    config.new_db |= cli.new_db;
    config.warm_db |= cli.warm_db;
    config.cleanup |= cli.cleanup;
    config.silent |= cli.silent;

    if cli.check {
        return run_check(config).await;
    }

    // No migrations are registered out of the box; a downstream binary embedding
    // this engine supplies its own `MigrationsIndex` and `SyncOp`s instead of going
    // through this CLI entrypoint.
    let migrations = MigrationsIndex::new(std::iter::empty::<(u64, u64, Migration)>());
    let syncs = Vec::new();

    let engine = Engine::bootstrap(config, syncs, migrations).await?;
    info!("engine started");
    engine.run().await?;
    Ok(())
}

async fn run_check(config: IndexerConfig) -> miette::Result<()> {
    let store = store::Store::connect(
        &config.mongo_uri,
        &config.mongo_db_name,
        config.flags().store_flags(),
        ["blocks", "transactions", "logs"].map(String::from),
    )
    .await
    .into_diagnostic()?;
    store.ping().await.into_diagnostic()?;
    info!("store reachable at {}", config.mongo_uri);
    Ok(())
}
