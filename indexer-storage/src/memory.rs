use std::{
    collections::{BTreeMap, HashSet},
    sync::atomic::{AtomicUsize, Ordering},
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{Account, Stats, Store, Transfer, TransferQuery, UnitOfWork, MAX_LIMIT};

/// In-process store with the same constraints as the postgres schema:
/// accounts are insert-or-ignore, transfer ids are unique, transfers must
/// reference existing accounts and a commit is all-or-nothing.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    lookups: AtomicUsize,
}

#[derive(Default)]
struct State {
    accounts: BTreeMap<String, Account>,
    transfers: BTreeMap<String, Transfer>,
    height: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `find_accounts` calls served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub async fn accounts(&self) -> Vec<Account> {
        self.state.lock().await.accounts.values().cloned().collect()
    }

    pub async fn transfers(&self) -> Vec<Transfer> {
        self.state.lock().await.transfers.values().cloned().collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_accounts(&self, ids: &[String]) -> Result<Vec<Account>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        let state = self.state.lock().await;
        let accounts = ids
            .iter()
            .filter_map(|id| state.accounts.get(id).cloned())
            .collect();

        Ok(accounts)
    }

    async fn commit(&self, unit: UnitOfWork) -> Result<()> {
        let mut state = self.state.lock().await;

        {
            let mut seen = HashSet::with_capacity(unit.transfers.len());
            for transfer in &unit.transfers {
                if state.transfers.contains_key(&transfer.id) || !seen.insert(transfer.id.as_str())
                {
                    bail!("Duplicate transfer id {}", transfer.id);
                }

                for account in [&transfer.from, &transfer.to] {
                    let known = state.accounts.contains_key(&account.id)
                        || unit.accounts.iter().any(|a| a.id == account.id);
                    if !known {
                        bail!(
                            "Transfer {} references unknown account {}",
                            transfer.id,
                            account.id
                        );
                    }
                }
            }
        }

        for account in unit.accounts {
            state.accounts.entry(account.id.clone()).or_insert(account);
        }

        for transfer in unit.transfers {
            state.transfers.insert(transfer.id.clone(), transfer);
        }

        state.height = Some(unit.height);

        Ok(())
    }

    async fn processor_height(&self) -> Result<Option<u64>> {
        Ok(self.state.lock().await.height)
    }

    async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        Ok(self.state.lock().await.accounts.get(id).cloned())
    }

    async fn get_transfer(&self, id: &str) -> Result<Option<Transfer>> {
        Ok(self.state.lock().await.transfers.get(id).cloned())
    }

    async fn get_transfers(&self, query: &TransferQuery) -> Result<Vec<Transfer>> {
        let state = self.state.lock().await;

        let mut transfers: Vec<Transfer> = state
            .transfers
            .values()
            .filter(|t| t.block_number >= query.from_block)
            .filter(|t| query.token.as_ref().map_or(true, |token| &t.token == token))
            .filter(|t| {
                query
                    .account
                    .as_ref()
                    .map_or(true, |a| &t.from.id == a || &t.to.id == a)
            })
            .cloned()
            .collect();

        transfers.sort_by(|a, b| (a.block_number, &a.id).cmp(&(b.block_number, &b.id)));
        transfers.truncate(query.limit.min(MAX_LIMIT) as usize);

        Ok(transfers)
    }

    async fn stats(&self) -> Result<Stats> {
        let state = self.state.lock().await;

        Ok(Stats {
            num_transfers: state.transfers.len() as u64,
            num_accounts: state.accounts.len() as u64,
            height: state.height,
        })
    }
}
