use {
    anyhow::{Context, Result},
    clap::Parser,
    std::{path::PathBuf, sync::Arc, time::Duration},
    tiascan_common::config::Config,
    tiascan_node::RpcClient,
    tiascan_pipeline::Indexer,
    tiascan_store::PostgresStore,
    tokio::time::interval,
    tracing::{debug, info, warn},
    tracing_subscriber::EnvFilter,
};

const METRICS_LOG_PERIOD: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[clap(version, about = "Celestia chain indexer ingestion service")]
struct Args {
    /// Path to the JSON configuration file.
    #[clap(short, long, default_value = "config.json", env = "TIASCAN_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    info!("starting tiascan indexer '{}'", config.indexer.name);

    let node = Arc::new(RpcClient::new(&config.node).context("building node client")?);
    let storage = Arc::new(
        PostgresStore::new(&config.database)
            .await
            .context("connecting to database")?,
    );

    let mut indexer = Indexer::start(&config.indexer, node, storage)
        .await
        .context("starting pipeline")?;
    let metrics = indexer.metrics.clone();

    let mut ticker = interval(METRICS_LOG_PERIOD);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            payload = indexer.genesis.pop() => match payload {
                Some(payload) => {
                    // The genesis parser plugs in here; for now the
                    // document is acknowledged as-is so syncing can start.
                    info!(
                        "genesis document received ({} bytes)",
                        payload.genesis.to_string().len()
                    );
                    if indexer.genesis_done.push(()).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            block = indexer.released.pop() => match block {
                Some(block) => {
                    // Hand-off point for the block parser and committer.
                    debug!(
                        "block {} ({}) ready, {} txs",
                        block.height(),
                        block.hash(),
                        block.block.txs.len()
                    );
                }
                None => {
                    warn!("release channel closed unexpectedly");
                    break;
                }
            },
            _ = ticker.tick() => info!("pipeline counters: {:?}", metrics),
        }
    }

    indexer.shutdown().await;
    info!("tiascan stopped");
    Ok(())
}
