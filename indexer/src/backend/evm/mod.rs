use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use futures::{stream, StreamExt, TryStreamExt};
use serde::Deserialize;
use tokio::{sync::mpsc, task::JoinHandle};
use web3::{
    transports::Http,
    types::{BlockId, BlockNumber, FilterBuilder, Log as Web3Log, H160, U64},
    Web3,
};

use crate::{
    backend::{Backend, BackendMethods},
    batch::{Batch, Block, BlockHeader, Log, Transaction},
    processor::TRANSFER_TOPIC,
};

pub const BACKEND_NAME: &str = "EVM";

const DEFAULT_FINALITY_CONFIRMATION: u64 = 10;
const DEFAULT_BATCH_SIZE: u64 = 1000;
const DEFAULT_REQUEST_INTERVAL: u64 = 1000;
const MAX_CONCURRENT_REQUESTS: usize = 16;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rpc_url: String,
    /// Watched token contracts. Empty means every contract.
    #[serde(default)]
    pub contract_addresses: Vec<String>,
    pub starting_block: Option<u64>,
    pub finality_confirmation: Option<u64>,
    pub batch_size: Option<u64>,
    pub request_interval: Option<u64>,
}

pub struct EvmBackend {
    config: Config,
    addresses: Vec<H160>,
    next_block: u64,
}

impl Backend for EvmBackend {
    type Config = Config;

    fn new(backend_config: Self::Config, processed_height: Option<u64>) -> Result<Self> {
        let addresses = parse_addresses(&backend_config.contract_addresses)?;
        let next_block = processed_height
            .map_or(0, |height| height + 1)
            .max(backend_config.starting_block.unwrap_or(0));

        Ok(Self {
            config: backend_config,
            addresses,
            next_block,
        })
    }
}

#[async_trait::async_trait]
impl BackendMethods for EvmBackend {
    async fn start(self, send: mpsc::Sender<Batch>) -> Result<JoinHandle<Result<()>>> {
        let transport = Http::new(&self.config.rpc_url)?;
        let web3 = Web3::new(transport);

        let handle = tokio::spawn(async move {
            let interval = Duration::from_millis(
                self.config
                    .request_interval
                    .unwrap_or(DEFAULT_REQUEST_INTERVAL),
            );
            let mut next = self.next_block;

            tracing::info!("Fetching transfers starting from block {next}");

            loop {
                match self.fetch_batch(&web3, next).await {
                    Ok(Some(batch)) => {
                        tracing::debug!(
                            "Fetched blocks {}..={} with {} logs",
                            batch.from_block,
                            batch.to_block,
                            batch.logs().count()
                        );
                        next = batch.to_block + 1;
                        send.send(batch).await?;
                    }
                    Ok(None) => tokio::time::sleep(interval).await,
                    Err(err) => {
                        tracing::warn!("Failed to fetch batch starting at block {next}: {err}");
                        tokio::time::sleep(interval).await;
                    }
                }
            }
        });

        Ok(handle)
    }
}

impl EvmBackend {
    async fn fetch_batch(&self, web3: &Web3<Http>, next: u64) -> Result<Option<Batch>> {
        let head = web3.eth().block_number().await?.as_u64();
        let Some((from_block, to_block)) = batch_range(
            next,
            head,
            self.config
                .finality_confirmation
                .unwrap_or(DEFAULT_FINALITY_CONFIRMATION),
            self.config.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
        ) else {
            return Ok(None);
        };

        let mut filter = FilterBuilder::default()
            .from_block(BlockNumber::Number(U64::from(from_block)))
            .to_block(BlockNumber::Number(U64::from(to_block)))
            .topics(Some(vec![TRANSFER_TOPIC]), None, None, None);
        if !self.addresses.is_empty() {
            filter = filter.address(self.addresses.clone());
        }

        let logs = web3.eth().logs(filter.build()).await?;

        let heights: BTreeSet<u64> = logs
            .iter()
            .filter_map(|log| log.block_number)
            .map(|n| n.as_u64())
            .collect();
        let headers: HashMap<u64, BlockHeader> = stream::iter(heights)
            .map(|height| fetch_header(web3, height))
            .buffered(MAX_CONCURRENT_REQUESTS)
            .try_collect::<Vec<_>>()
            .await?
            .into_iter()
            .map(|header| (header.height, header))
            .collect();

        Ok(Some(Batch {
            from_block,
            to_block,
            blocks: group_logs(logs, &headers)?,
        }))
    }
}

async fn fetch_header(web3: &Web3<Http>, height: u64) -> Result<BlockHeader> {
    let block = web3
        .eth()
        .block(BlockId::Number(BlockNumber::Number(U64::from(height))))
        .await?
        .ok_or_else(|| anyhow!("Block not found: {height}"))?;

    Ok(BlockHeader {
        height,
        hash: block
            .hash
            .ok_or_else(|| anyhow!("Block {height} has no hash"))?,
        timestamp: block.timestamp.as_u64(),
    })
}

fn parse_addresses(addresses: &[String]) -> Result<Vec<H160>> {
    addresses
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .map(|a| {
            a.parse::<H160>()
                .map_err(|e| anyhow!("Invalid contract address {a}: {e}"))
        })
        .collect()
}

/// Next inclusive range to fetch, or `None` if `next` is not finalized yet.
fn batch_range(next: u64, head: u64, confirmations: u64, batch_size: u64) -> Option<(u64, u64)> {
    let safe = head.checked_sub(confirmations)?;
    if next > safe {
        return None;
    }

    let to = next.saturating_add(batch_size.max(1) - 1).min(safe);
    Some((next, to))
}

/// Groups RPC logs into blocks in chain order. Logs flagged as removed are
/// dropped.
fn group_logs(logs: Vec<Web3Log>, headers: &HashMap<u64, BlockHeader>) -> Result<Vec<Block>> {
    let mut blocks: BTreeMap<u64, Vec<Log>> = BTreeMap::new();

    for log in logs {
        if log.removed == Some(true) {
            continue;
        }

        let Some(height) = log.block_number.map(|n| n.as_u64()) else {
            bail!("Log without block number: {log:?}");
        };
        let Some(log_index) = log.log_index.map(|i| i.as_u64()) else {
            bail!("Log without index in block {height}");
        };
        let header = headers
            .get(&height)
            .ok_or_else(|| anyhow!("Missing header for block {height}"))?;

        blocks.entry(height).or_default().push(Log {
            id: Log::make_id(header, log_index),
            log_index,
            address: log.address,
            topics: log.topics,
            data: log.data.0,
            block: header.clone(),
            transaction: log.transaction_hash.map(|hash| Transaction { hash }),
        });
    }

    Ok(blocks
        .into_iter()
        .map(|(height, mut logs)| {
            logs.sort_by_key(|log| log.log_index);
            Block {
                header: headers[&height].clone(),
                logs,
            }
        })
        .collect())
}
