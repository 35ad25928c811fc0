use web3::types::{H160, H256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: H256,
    /// Unix timestamp in seconds, as reported by the node.
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub hash: H256,
}

#[derive(Debug, Clone)]
pub struct Log {
    pub id: String,
    pub log_index: u64,
    pub address: H160,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub block: BlockHeader,
    pub transaction: Option<Transaction>,
}

impl Log {
    /// Builds the canonical id of a log: zero-padded height, the first five
    /// hex digits of the block hash and the zero-padded index within the block.
    pub fn make_id(block: &BlockHeader, log_index: u64) -> String {
        let hash = format!("{:x}", block.hash);
        format!("{:010}-{}-{:06}", block.height, &hash[..5], log_index)
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub header: BlockHeader,
    pub logs: Vec<Log>,
}

/// An inclusive range of finalized blocks. Blocks without matching logs are
/// not listed but still count as processed.
#[derive(Debug, Clone)]
pub struct Batch {
    pub from_block: u64,
    pub to_block: u64,
    pub blocks: Vec<Block>,
}

impl Batch {
    pub fn logs(&self) -> impl Iterator<Item = &Log> {
        self.blocks.iter().flat_map(|block| block.logs.iter())
    }
}
