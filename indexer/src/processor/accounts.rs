use std::collections::{HashMap, HashSet};

use anyhow::Result;
use erc20_indexer_storage::{Account, Store};

use super::decoder::TransferEvent;

/// Resolves every sender and receiver of a batch to an account, using a
/// single bulk lookup. Accounts that don't exist yet are constructed but not
/// persisted.
pub async fn resolve(
    store: &dyn Store,
    transfers: &[TransferEvent],
) -> Result<HashMap<String, Account>> {
    let mut ids = HashSet::with_capacity(transfers.len() * 2);
    for t in transfers {
        ids.insert(t.from.as_str());
        ids.insert(t.to.as_str());
    }

    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let ids: Vec<String> = ids.into_iter().map(str::to_string).collect();
    let mut accounts: HashMap<String, Account> = store
        .find_accounts(&ids)
        .await?
        .into_iter()
        .map(|account| (account.id.clone(), account))
        .collect();

    for id in ids {
        accounts.entry(id).or_insert_with_key(|id| Account::new(id.as_str()));
    }

    Ok(accounts)
}

#[cfg(test)]
mod tests {
    use erc20_indexer_storage::{MemoryStore, UnitOfWork};
    use web3::types::{H160, U256};

    use super::*;
    use crate::processor::decoder::{decode, format_address, tests::transfer_log};

    fn event(index: u64, from: H160, to: H160) -> TransferEvent {
        decode(&transfer_log(index, from, to, U256::one())).unwrap()
    }

    #[tokio::test]
    async fn test_deduplicates_addresses() {
        let store = MemoryStore::new();
        let x = H160::repeat_byte(1);
        let y = H160::repeat_byte(2);

        let accounts = resolve(&store, &[event(0, x, y), event(1, x, y)]).await.unwrap();

        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[&format_address(&x)], Account::new(format_address(&x)));
        assert_eq!(accounts[&format_address(&y)], Account::new(format_address(&y)));
        assert_eq!(store.lookups(), 1);
    }

    #[tokio::test]
    async fn test_covers_union_of_senders_and_receivers() {
        let store = MemoryStore::new();
        let addresses: Vec<H160> = (1..=5).map(H160::repeat_byte).collect();

        let events: Vec<_> = addresses
            .windows(2)
            .enumerate()
            .map(|(i, pair)| event(i as u64, pair[0], pair[1]))
            .collect();

        let accounts = resolve(&store, &events).await.unwrap();

        assert_eq!(accounts.len(), addresses.len());
        for address in &addresses {
            assert!(accounts.contains_key(&format_address(address)));
        }
        assert_eq!(store.lookups(), 1);
    }

    #[tokio::test]
    async fn test_merges_existing_and_new_accounts() {
        let store = MemoryStore::new();
        let existing = format_address(&H160::repeat_byte(1));
        store
            .commit(UnitOfWork {
                accounts: vec![Account::new(existing.clone())],
                transfers: vec![],
                height: 1,
            })
            .await
            .unwrap();

        let accounts = resolve(&store, &[event(0, H160::repeat_byte(1), H160::repeat_byte(2))])
            .await
            .unwrap();

        assert_eq!(accounts.len(), 2);
        assert!(accounts.contains_key(&existing));
        // Nothing is persisted until the batch is written.
        assert_eq!(store.accounts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let store = MemoryStore::new();
        let events = vec![
            event(0, H160::repeat_byte(1), H160::repeat_byte(2)),
            event(1, H160::repeat_byte(2), H160::repeat_byte(3)),
        ];

        let first = resolve(&store, &events).await.unwrap();
        let second = resolve(&store, &events).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_batch_skips_lookup() {
        let store = MemoryStore::new();

        let accounts = resolve(&store, &[]).await.unwrap();

        assert!(accounts.is_empty());
        assert_eq!(store.lookups(), 0);
    }
}
