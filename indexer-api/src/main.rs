use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use erc20_indexer_storage::{
    Account, PgStore, Store, Transfer, TransferQuery, MAX_LIMIT, STORAGE_NAME,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

type SharedDb = Arc<dyn Store>;

#[derive(Debug, Clone)]
pub struct Config {
    port: u16,
    storage: erc20_indexer_storage::Config,
}

impl Config {
    pub fn init() -> Result<Self> {
        Ok(Config {
            port: std::env::var("PORT")
                .ok()
                .and_then(|port| port.parse().ok())
                .unwrap_or(3000),
            storage: envy::prefixed(format!("{}_", STORAGE_NAME)).from_env()?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::init()?;
    tracing::info!("{config:#?}");

    let storage: SharedDb = Arc::new(PgStore::open(config.storage).await?);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    tracing::info!("Starting server on {addr}");
    axum::Server::bind(&addr)
        .serve(router(storage).into_make_service())
        .await?;

    Ok(())
}

fn router(storage: SharedDb) -> Router {
    Router::new()
        .route("/transfers", get(get_transfers))
        .route("/transfers/:id", get(get_transfer))
        .route("/accounts/:id", get(get_account))
        .route("/accounts/:id/transfers", get(get_account_transfers))
        .route("/info", get(info))
        .layer(Extension(storage))
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
pub struct TransferPaginationQuery {
    block_height: Option<u64>,
    token: Option<String>,
    limit: Option<u64>,
}

impl TransferPaginationQuery {
    fn into_query(self, account: Option<String>) -> TransferQuery {
        TransferQuery {
            from_block: self.block_height.unwrap_or_default(),
            token: self.token.map(|t| t.to_lowercase()),
            account,
            limit: self
                .limit
                .map(|l| l.clamp(0, MAX_LIMIT))
                .unwrap_or(MAX_LIMIT),
        }
    }
}

#[derive(Debug, Serialize)]
struct TransferResponse {
    id: String,
    block_number: u64,
    /// Unix seconds.
    timestamp: i64,
    tx_hash: String,
    token: String,
    from: String,
    to: String,
    /// Decimal string, amounts don't fit into JSON numbers.
    amount: String,
}

impl From<Transfer> for TransferResponse {
    fn from(t: Transfer) -> Self {
        Self {
            id: t.id,
            block_number: t.block_number,
            timestamp: t.timestamp.unix_timestamp(),
            tx_hash: t.tx_hash,
            token: t.token,
            from: t.from.id,
            to: t.to.id,
            amount: t.amount.to_string(),
        }
    }
}

async fn get_transfers(
    Extension(db): Extension<SharedDb>,
    Query(p): Query<TransferPaginationQuery>,
) -> AppResult<Json<Vec<TransferResponse>>> {
    let transfers = db.get_transfers(&p.into_query(None)).await?;

    Ok(Json(transfers.into_iter().map(Into::into).collect()))
}

async fn get_transfer(
    Extension(db): Extension<SharedDb>,
    Path(id): Path<String>,
) -> AppResult<Json<TransferResponse>> {
    match db.get_transfer(&id).await? {
        Some(transfer) => Ok(Json(transfer.into())),
        None => Err(AppError::NotFound),
    }
}

async fn get_account(
    Extension(db): Extension<SharedDb>,
    Path(id): Path<String>,
) -> AppResult<Json<Account>> {
    match db.get_account(&id.to_lowercase()).await? {
        Some(account) => Ok(Json(account)),
        None => Err(AppError::NotFound),
    }
}

async fn get_account_transfers(
    Extension(db): Extension<SharedDb>,
    Path(id): Path<String>,
    Query(p): Query<TransferPaginationQuery>,
) -> AppResult<Json<Vec<TransferResponse>>> {
    let transfers = db
        .get_transfers(&p.into_query(Some(id.to_lowercase())))
        .await?;

    Ok(Json(transfers.into_iter().map(Into::into).collect()))
}

#[derive(Serialize)]
struct InfoResponse {
    version: String,
    num_transfers: u64,
    num_accounts: u64,
    height: Option<u64>,
}

async fn info(Extension(db): Extension<SharedDb>) -> AppResult<Json<InfoResponse>> {
    let stats = db.stats().await?;

    Ok(Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        num_transfers: stats.num_transfers,
        num_accounts: stats.num_accounts,
        height: stats.height,
    }))
}

type AppResult<T> = Result<T, AppError>;

enum AppError {
    NotFound,
    InternalServerError(anyhow::Error),
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND.into_response(),
            Self::InternalServerError(err) => {
                tracing::warn!("Internal server error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({
                        "error": err.to_string(),
                    })),
                )
                    .into_response()
            }
        }
    }
}
