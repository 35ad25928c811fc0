use anyhow::Result;
use tokio::{sync::mpsc::Sender, task::JoinHandle};

use crate::batch::Batch;

pub mod evm;

pub trait Backend: Sized + BackendMethods {
    type Config;

    /// `processed_height` is the last block already committed to the store.
    fn new(backend_config: Self::Config, processed_height: Option<u64>) -> Result<Self>;
}

#[async_trait::async_trait]
pub trait BackendMethods {
    /// Starts fetching batches in the background. Batches are sent in
    /// ascending block order without gaps.
    async fn start(self, send: Sender<Batch>) -> Result<JoinHandle<Result<()>>>;
}
