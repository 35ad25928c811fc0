use anyhow::{bail, Result};
use tracing_subscriber::EnvFilter;

mod backend;
mod batch;
mod config;
mod indexer;
mod processor;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::Config::init()?;

    tracing::info!("{config:#?}");

    let (indexer_worker, processor_worker) = indexer::start_indexer(config).await?;

    tokio::select! {
        res = indexer_worker => {
            tracing::error!("Indexer worker stopped: {:?}", res);
        }
        res = processor_worker => {
            tracing::error!("Processor worker stopped: {:?}", res);
        }
    }

    bail!("Indexer stopped")
}
