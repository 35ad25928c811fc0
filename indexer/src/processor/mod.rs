use std::sync::Arc;

use erc20_indexer_storage::Store;

use crate::batch::Batch;

pub mod accounts;
pub mod decoder;
pub mod writer;

pub use decoder::{DecodeError, TRANSFER_TOPIC};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to decode log {log_id}: {source}")]
    Decode {
        log_id: String,
        #[source]
        source: DecodeError,
    },
    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub blocks: usize,
    pub transfers: usize,
    pub accounts: usize,
}

/// Turns batches of logs into persisted accounts and transfers.
pub struct Processor {
    store: Arc<dyn Store>,
}

impl Processor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Decodes every transfer in the batch, resolves the involved accounts
    /// and commits everything at once. Any error leaves the store untouched.
    pub async fn process(&self, batch: &Batch) -> Result<BatchSummary, ProcessError> {
        let transfers = batch
            .logs()
            .filter(|log| decoder::is_transfer(log))
            .map(|log| {
                decoder::decode(log).map_err(|source| ProcessError::Decode {
                    log_id: log.id.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let accounts = accounts::resolve(self.store.as_ref(), &transfers).await?;

        let summary = BatchSummary {
            blocks: batch.blocks.len(),
            transfers: transfers.len(),
            accounts: accounts.len(),
        };

        writer::commit(self.store.as_ref(), accounts, transfers, batch.to_block).await?;

        tracing::info!(
            "Processed blocks {}..={} ({} with logs): {} transfers, {} accounts",
            batch.from_block,
            batch.to_block,
            summary.blocks,
            summary.transfers,
            summary.accounts
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use erc20_indexer_storage::{MemoryStore, TransferQuery};
    use web3::types::{H160, H256, U256};

    use super::*;
    use crate::{
        batch::{Block, Log},
        processor::decoder::{format_address, tests::transfer_log},
    };

    fn batch(logs: Vec<Log>) -> Batch {
        Batch {
            from_block: 90,
            to_block: 110,
            blocks: vec![Block {
                header: logs[0].block.clone(),
                logs,
            }],
        }
    }

    fn setup() -> (Arc<MemoryStore>, Processor) {
        let store = Arc::new(MemoryStore::new());
        let processor = Processor::new(store.clone());
        (store, processor)
    }

    #[tokio::test]
    async fn test_single_transfer() {
        let (store, processor) = setup();
        let from = H160::repeat_byte(0xaa);
        let to = H160::repeat_byte(0xbb);

        let summary = processor
            .process(&batch(vec![transfer_log(0, from, to, U256::from(1_000_000u64))]))
            .await
            .unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                blocks: 1,
                transfers: 1,
                accounts: 2,
            }
        );

        let transfers = store.transfers().await;
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].amount.to_string(), "1000000");

        let mut ids: Vec<_> = store.accounts().await.into_iter().map(|a| a.id).collect();
        ids.sort();
        assert_eq!(ids, vec![format_address(&from), format_address(&to)]);
        assert_eq!(store.processor_height().await.unwrap(), Some(110));
    }

    #[tokio::test]
    async fn test_repeated_participants() {
        let (store, processor) = setup();
        let x = H160::repeat_byte(1);
        let y = H160::repeat_byte(2);

        let summary = processor
            .process(&batch(vec![
                transfer_log(0, x, y, U256::one()),
                transfer_log(1, x, y, U256::from(2u64)),
            ]))
            .await
            .unwrap();

        assert_eq!(summary.transfers, 2);
        assert_eq!(summary.accounts, 2);
        assert_eq!(store.accounts().await.len(), 2);
        assert_eq!(store.lookups(), 1);
    }

    #[tokio::test]
    async fn test_accounts_from_previous_batches_are_reused() {
        let (store, processor) = setup();
        let x = H160::repeat_byte(1);
        let y = H160::repeat_byte(2);
        let z = H160::repeat_byte(3);

        processor
            .process(&batch(vec![transfer_log(0, x, y, U256::one())]))
            .await
            .unwrap();

        let mut second = batch(vec![transfer_log(1, y, z, U256::one())]);
        second.from_block = 111;
        second.to_block = 120;
        processor.process(&second).await.unwrap();

        assert_eq!(store.accounts().await.len(), 3);

        let transfers = store
            .get_transfers(&TransferQuery {
                account: Some(format_address(&y)),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(transfers.len(), 2);

        for t in store.transfers().await {
            assert!(store.get_account(&t.from.id).await.unwrap().is_some());
            assert!(store.get_account(&t.to.id).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_non_transfer_logs_are_skipped() {
        let (store, processor) = setup();
        let mut approval = transfer_log(1, H160::repeat_byte(1), H160::repeat_byte(2), U256::one());
        approval.topics[0] = H256::repeat_byte(0x8c);

        let summary = processor
            .process(&batch(vec![
                transfer_log(0, H160::repeat_byte(1), H160::repeat_byte(2), U256::one()),
                approval,
            ]))
            .await
            .unwrap();

        assert_eq!(summary.transfers, 1);
        assert_eq!(store.transfers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_transaction_aborts_batch() {
        let (store, processor) = setup();
        let mut orphan = transfer_log(1, H160::repeat_byte(1), H160::repeat_byte(2), U256::one());
        orphan.transaction = None;

        let res = processor
            .process(&batch(vec![
                transfer_log(0, H160::repeat_byte(3), H160::repeat_byte(4), U256::one()),
                orphan,
            ]))
            .await;

        assert!(matches!(
            res,
            Err(ProcessError::Decode {
                source: DecodeError::MissingTransaction,
                ..
            })
        ));
        assert!(store.transfers().await.is_empty());
        assert!(store.accounts().await.is_empty());
        assert_eq!(store.lookups(), 0);
        assert_eq!(store.processor_height().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_log_aborts_batch() {
        let (store, processor) = setup();
        let mut malformed =
            transfer_log(0, H160::repeat_byte(1), H160::repeat_byte(2), U256::one());
        malformed.data.clear();

        let res = processor.process(&batch(vec![malformed])).await;

        assert!(matches!(res, Err(ProcessError::Decode { .. })));
        assert!(store.transfers().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_records_height() {
        let (store, processor) = setup();

        let summary = processor
            .process(&Batch {
                from_block: 0,
                to_block: 999,
                blocks: vec![],
            })
            .await
            .unwrap();

        assert_eq!(summary.transfers, 0);
        assert_eq!(store.processor_height().await.unwrap(), Some(999));
        assert!(store.accounts().await.is_empty());
    }

    #[tokio::test]
    async fn test_reprocessing_batch_fails() {
        let (store, processor) = setup();
        let batch = batch(vec![transfer_log(
            0,
            H160::repeat_byte(1),
            H160::repeat_byte(2),
            U256::one(),
        )]);

        processor.process(&batch).await.unwrap();
        let res = processor.process(&batch).await;

        assert!(matches!(res, Err(ProcessError::Store(_))));
        assert_eq!(store.transfers().await.len(), 1);
    }
}
