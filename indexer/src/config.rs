use anyhow::Result;
use erc20_indexer_storage::STORAGE_NAME;
use serde::{de::DeserializeOwned, Deserialize};

use crate::backend::evm::BACKEND_NAME;

const PROCESSOR_NAME: &str = "PROCESSOR";

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: crate::backend::evm::Config,
    pub storage: erc20_indexer_storage::Config,
    pub processor: ProcessorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    /// How many times a failed batch is re-run before the worker gives up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between retries, in milliseconds.
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_interval: default_retry_interval(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_interval() -> u64 {
    1000
}

impl Config {
    pub fn init() -> Result<Self> {
        Ok(Config {
            backend: prefixed_config(BACKEND_NAME)?,
            storage: prefixed_config(STORAGE_NAME)?,
            processor: prefixed_config(PROCESSOR_NAME)?,
        })
    }
}

fn prefixed_config<T: DeserializeOwned>(prefix: &str) -> Result<T> {
    Ok(envy::prefixed(format!("{prefix}_")).from_env()?)
}
