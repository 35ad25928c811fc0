use std::{sync::Arc, time::Duration};

use anyhow::Result;
use erc20_indexer_storage::{PgStore, Store};
use tokio::{
    sync::mpsc::{self, Receiver},
    task::JoinHandle,
};

use crate::{
    backend::{evm::EvmBackend, Backend, BackendMethods},
    batch::Batch,
    config::{Config, ProcessorConfig},
    processor::Processor,
};

// Batches fetched ahead of the processor.
const BATCH_QUEUE_SIZE: usize = 4;

pub async fn start_indexer(
    config: Config,
) -> Result<(JoinHandle<Result<()>>, JoinHandle<Result<()>>)> {
    let store: Arc<dyn Store> = Arc::new(PgStore::open(config.storage).await?);

    let processed_height = store.processor_height().await?;
    tracing::info!("Last processed block: {processed_height:?}");

    let (send, recv) = mpsc::channel(BATCH_QUEUE_SIZE);

    let indexer_worker = EvmBackend::new(config.backend, processed_height)?
        .start(send)
        .await?;

    let processor_worker = tokio::spawn(run_processor(
        Processor::new(store),
        recv,
        config.processor,
    ));

    Ok((indexer_worker, processor_worker))
}

/// Processes batches strictly one after another. A failed batch is re-run
/// until it succeeds or the retries are exhausted, at which point the worker
/// stops with the error.
pub async fn run_processor(
    processor: Processor,
    mut recv: Receiver<Batch>,
    config: ProcessorConfig,
) -> Result<()> {
    tracing::info!("Processor worker listening for new batches");

    let retry_interval = Duration::from_millis(config.retry_interval);

    while let Some(batch) = recv.recv().await {
        let mut attempt = 0;

        loop {
            match processor.process(&batch).await {
                Ok(_) => break,
                Err(err) if attempt < config.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Failed to process blocks {}..={} (attempt {attempt}/{}): {err}",
                        batch.from_block,
                        batch.to_block,
                        config.max_retries
                    );
                    tokio::time::sleep(retry_interval).await;
                }
                Err(err) => {
                    tracing::error!(
                        "Giving up on blocks {}..={}: {err}",
                        batch.from_block,
                        batch.to_block
                    );
                    return Err(err.into());
                }
            }
        }
    }

    tracing::info!("Batch channel closed, processor worker exiting");

    Ok(())
}
