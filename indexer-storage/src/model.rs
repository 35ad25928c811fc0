use serde::{Deserialize, Serialize};
use sqlx::types::{time::OffsetDateTime, BigDecimal};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    /// Lowercase `0x`-prefixed hex address.
    pub id: String,
}

impl Account {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub id: String,
    pub block_number: u64,
    pub timestamp: OffsetDateTime,
    pub tx_hash: String,
    /// Address of the token contract that emitted the event.
    pub token: String,
    pub from: Account,
    pub to: Account,
    pub amount: BigDecimal,
}
