use std::{collections::HashMap, str::FromStr};

use anyhow::{anyhow, Result};
use erc20_indexer_storage::{Account, BigDecimal, OffsetDateTime, Store, Transfer, UnitOfWork};

use super::decoder::TransferEvent;

fn account(accounts: &HashMap<String, Account>, id: &str) -> Result<Account> {
    accounts
        .get(id)
        .cloned()
        .ok_or_else(|| anyhow!("Account {id} was not resolved"))
}

fn to_record(accounts: &HashMap<String, Account>, event: TransferEvent) -> Result<Transfer> {
    let timestamp = OffsetDateTime::from_unix_timestamp(event.block.timestamp as i64)?;
    let amount = BigDecimal::from_str(&event.amount.to_string())?;

    Ok(Transfer {
        from: account(accounts, &event.from)?,
        to: account(accounts, &event.to)?,
        id: event.id,
        block_number: event.block.height,
        timestamp,
        tx_hash: format!("{:#x}", event.transaction.hash),
        token: event.token,
        amount,
    })
}

/// Persists a batch as one unit of work: accounts are upserted first, then
/// transfers are inserted, then `height` is recorded as processed.
pub async fn commit(
    store: &dyn Store,
    accounts: HashMap<String, Account>,
    transfers: Vec<TransferEvent>,
    height: u64,
) -> Result<()> {
    let transfers = transfers
        .into_iter()
        .map(|event| to_record(&accounts, event))
        .collect::<Result<Vec<_>>>()?;

    store
        .commit(UnitOfWork {
            accounts: accounts.into_values().collect(),
            transfers,
            height,
        })
        .await
}

#[cfg(test)]
mod tests {
    use erc20_indexer_storage::MemoryStore;
    use web3::types::{H160, U256};

    use super::*;
    use crate::processor::{
        accounts::resolve,
        decoder::{decode, tests::transfer_log},
    };

    #[tokio::test]
    async fn test_commit_builds_records() {
        let store = MemoryStore::new();
        let amount = U256::MAX;
        let events = vec![decode(&transfer_log(
            0,
            H160::repeat_byte(0xaa),
            H160::repeat_byte(0xbb),
            amount,
        ))
        .unwrap()];

        let accounts = resolve(&store, &events).await.unwrap();
        commit(&store, accounts, events.clone(), 100).await.unwrap();

        let transfers = store.transfers().await;
        assert_eq!(transfers.len(), 1);

        let transfer = &transfers[0];
        assert_eq!(transfer.id, events[0].id);
        assert_eq!(transfer.block_number, 100);
        assert_eq!(transfer.timestamp.unix_timestamp(), 1_700_000_000);
        assert_eq!(transfer.tx_hash, format!("0x{}", "00".repeat(32)));
        assert_eq!(transfer.from.id, events[0].from);
        assert_eq!(transfer.to.id, events[0].to);
        assert_eq!(
            transfer.amount,
            BigDecimal::from_str(
                "115792089237316195423570985008687907853269984665640564039457584007913129639935"
            )
            .unwrap()
        );

        for t in &transfers {
            assert!(store.get_account(&t.from.id).await.unwrap().is_some());
            assert!(store.get_account(&t.to.id).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_unresolved_account_fails_without_writing() {
        let store = MemoryStore::new();
        let events = vec![decode(&transfer_log(
            0,
            H160::repeat_byte(1),
            H160::repeat_byte(2),
            U256::one(),
        ))
        .unwrap()];

        let res = commit(&store, HashMap::new(), events, 100).await;

        assert!(res.is_err());
        assert!(store.transfers().await.is_empty());
        assert_eq!(store.processor_height().await.unwrap(), None);
    }
}
