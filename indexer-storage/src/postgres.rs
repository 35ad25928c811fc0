use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{
    postgres::PgPoolOptions,
    types::{time::OffsetDateTime, BigDecimal},
    FromRow, PgPool, Postgres, QueryBuilder,
};

use crate::{Account, Stats, Store, Transfer, TransferQuery, UnitOfWork, MAX_LIMIT};

pub const STORAGE_NAME: &str = "PG";

// Postgres caps a statement at 65535 bind parameters.
const MAX_ROWS_PER_INSERT: usize = 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    url: String,
    #[serde(default = "default_max_connections")]
    max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

pub struct PgStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct TransferRow {
    id: String,
    block_number: i64,
    timestamp: OffsetDateTime,
    tx_hash: String,
    token: String,
    from_id: String,
    to_id: String,
    amount: BigDecimal,
}

impl From<TransferRow> for Transfer {
    fn from(row: TransferRow) -> Self {
        Transfer {
            id: row.id,
            block_number: row.block_number as u64,
            timestamp: row.timestamp,
            tx_hash: row.tx_hash,
            token: row.token,
            from: Account::new(row.from_id),
            to: Account::new(row.to_id),
            amount: row.amount,
        }
    }
}

const SELECT_TRANSFERS: &str =
    "SELECT id, block_number, timestamp, tx_hash, token, from_id, to_id, amount FROM transfers";

impl PgStore {
    pub async fn open(config: Config) -> Result<Self> {
        tracing::info!("Initializing postgres connection pool");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        tracing::info!("Creating/checking accounts table");
        sqlx::query("CREATE TABLE IF NOT EXISTS accounts (id TEXT PRIMARY KEY)")
            .execute(&pool)
            .await?;

        tracing::info!("Creating/checking transfers table");
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transfers (
                id TEXT PRIMARY KEY,
                block_number BIGINT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                tx_hash TEXT NOT NULL,
                token TEXT NOT NULL,
                from_id TEXT NOT NULL REFERENCES accounts (id),
                to_id TEXT NOT NULL REFERENCES accounts (id),
                amount NUMERIC(78, 0) NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        tracing::info!("Creating/checking transfers table indices");
        for index in [
            "CREATE INDEX IF NOT EXISTS transfers_block_number ON transfers (block_number)",
            "CREATE INDEX IF NOT EXISTS transfers_from_id ON transfers (from_id)",
            "CREATE INDEX IF NOT EXISTS transfers_to_id ON transfers (to_id)",
        ] {
            sqlx::query(index).execute(&pool).await?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS processor_status (
                id INT PRIMARY KEY,
                height BIGINT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_accounts(&self, ids: &[String]) -> Result<Vec<Account>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM accounts WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(id,)| Account::new(id)).collect())
    }

    async fn commit(&self, unit: UnitOfWork) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for chunk in unit.accounts.chunks(MAX_ROWS_PER_INSERT) {
            let mut query = QueryBuilder::<Postgres>::new("INSERT INTO accounts (id) ");
            query.push_values(chunk, |mut row, account| {
                row.push_bind(account.id.clone());
            });
            query.push(" ON CONFLICT (id) DO NOTHING");
            query.build().execute(&mut tx).await?;
        }

        for chunk in unit.transfers.chunks(MAX_ROWS_PER_INSERT) {
            let mut query = QueryBuilder::<Postgres>::new(
                "INSERT INTO transfers (id, block_number, timestamp, tx_hash, token, from_id, to_id, amount) ",
            );
            query.push_values(chunk, |mut row, transfer| {
                row.push_bind(transfer.id.clone())
                    .push_bind(transfer.block_number as i64)
                    .push_bind(transfer.timestamp)
                    .push_bind(transfer.tx_hash.clone())
                    .push_bind(transfer.token.clone())
                    .push_bind(transfer.from.id.clone())
                    .push_bind(transfer.to.id.clone())
                    .push_bind(transfer.amount.clone());
            });
            query.build().execute(&mut tx).await?;
        }

        sqlx::query(
            "INSERT INTO processor_status (id, height) VALUES (0, $1)
            ON CONFLICT (id) DO UPDATE SET height = EXCLUDED.height",
        )
        .bind(unit.height as i64)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            "Committed {} accounts and {} transfers up to block {}",
            unit.accounts.len(),
            unit.transfers.len(),
            unit.height
        );

        Ok(())
    }

    async fn processor_height(&self) -> Result<Option<u64>> {
        let height: Option<i64> =
            sqlx::query_scalar("SELECT height FROM processor_status WHERE id = 0")
                .fetch_optional(&self.pool)
                .await?;

        Ok(height.map(|h| h as u64))
    }

    async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(id,)| Account::new(id)))
    }

    async fn get_transfer(&self, id: &str) -> Result<Option<Transfer>> {
        let row: Option<TransferRow> = sqlx::query_as(&format!("{SELECT_TRANSFERS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Transfer::from))
    }

    async fn get_transfers(&self, q: &TransferQuery) -> Result<Vec<Transfer>> {
        let mut query = QueryBuilder::<Postgres>::new(SELECT_TRANSFERS);
        query.push(" WHERE block_number >= ");
        query.push_bind(q.from_block as i64);

        if let Some(token) = &q.token {
            query.push(" AND token = ").push_bind(token.clone());
        }

        if let Some(account) = &q.account {
            query
                .push(" AND (from_id = ")
                .push_bind(account.clone())
                .push(" OR to_id = ")
                .push_bind(account.clone())
                .push(")");
        }

        query.push(" ORDER BY block_number ASC, id ASC LIMIT ");
        query.push_bind(q.limit.min(MAX_LIMIT) as i64);

        let rows = query
            .build_query_as::<TransferRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Transfer::from).collect())
    }

    async fn stats(&self) -> Result<Stats> {
        let num_transfers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transfers")
            .fetch_one(&self.pool)
            .await?;
        let num_accounts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.pool)
            .await?;

        Ok(Stats {
            num_transfers: num_transfers as u64,
            num_accounts: num_accounts as u64,
            height: self.processor_height().await?,
        })
    }
}
