#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::*;
pub use memory::*;
pub use model::*;
pub use sqlx::types::{time::OffsetDateTime, BigDecimal};

mod memory;
mod model;

use anyhow::Result;
use async_trait::async_trait;

/// Maximum number of rows a single listing query returns.
pub const MAX_LIMIT: u64 = 100;

/// Everything that has to become durable for one processed batch.
#[derive(Debug, Clone, Default)]
pub struct UnitOfWork {
    pub accounts: Vec<Account>,
    pub transfers: Vec<Transfer>,
    /// Last block height covered by the batch.
    pub height: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TransferQuery {
    pub from_block: u64,
    pub token: Option<String>,
    /// Matches transfers where the account is either sender or receiver.
    pub account: Option<String>,
    pub limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub num_transfers: u64,
    pub num_accounts: u64,
    pub height: Option<u64>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Bulk lookup of existing accounts. Ids that are not stored are omitted
    /// from the result.
    async fn find_accounts(&self, ids: &[String]) -> Result<Vec<Account>>;

    /// Upsert accounts (insert-or-ignore), insert transfers and record the
    /// processed height. Either all of it becomes durable or none of it does.
    async fn commit(&self, unit: UnitOfWork) -> Result<()>;

    /// Height of the last committed batch.
    async fn processor_height(&self) -> Result<Option<u64>>;

    async fn get_account(&self, id: &str) -> Result<Option<Account>>;
    async fn get_transfer(&self, id: &str) -> Result<Option<Transfer>>;
    async fn get_transfers(&self, query: &TransferQuery) -> Result<Vec<Transfer>>;
    async fn stats(&self) -> Result<Stats>;
}
