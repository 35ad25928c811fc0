use web3::{
    ethabi::{self, Event, EventParam, ParamType, RawLog, Token},
    types::{H160, H256, U256},
};

use crate::batch::{BlockHeader, Log, Transaction};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: H256 = H256([
    0xdd, 0xf2, 0x52, 0xad, 0x1b, 0xe2, 0xc8, 0x9b, 0x69, 0xc2, 0xb0, 0x68, 0xfc, 0x37, 0x8d, 0xaa,
    0x95, 0x2b, 0xa7, 0xf1, 0x63, 0xc4, 0xa1, 0x16, 0x28, 0xf5, 0x5a, 0x4d, 0xf5, 0x23, 0xb3, 0xef,
]);

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid Transfer event encoding: {0}")]
    Abi(#[from] ethabi::Error),
    #[error("Unexpected Transfer event parameter `{0}`")]
    UnexpectedParam(String),
    #[error("Missing transaction")]
    MissingTransaction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub id: String,
    pub block: BlockHeader,
    pub transaction: Transaction,
    pub token: String,
    pub from: String,
    pub to: String,
    pub amount: U256,
}

fn transfer_event() -> Event {
    let param = |name: &str, kind, indexed| EventParam {
        name: name.to_string(),
        kind,
        indexed,
    };

    Event {
        name: "Transfer".to_string(),
        inputs: vec![
            param("from", ParamType::Address, true),
            param("to", ParamType::Address, true),
            param("value", ParamType::Uint(256), false),
        ],
        anonymous: false,
    }
}

pub fn format_address(address: &H160) -> String {
    format!("{address:#x}")
}

pub fn is_transfer(log: &Log) -> bool {
    log.topics.first() == Some(&TRANSFER_TOPIC)
}

pub fn decode(log: &Log) -> Result<TransferEvent, DecodeError> {
    let decoded = transfer_event().parse_log(RawLog {
        topics: log.topics.clone(),
        data: log.data.clone(),
    })?;

    let mut from = None;
    let mut to = None;
    let mut amount = None;

    for param in decoded.params {
        match (param.name.as_str(), param.value) {
            ("from", Token::Address(address)) => from = Some(format_address(&address)),
            ("to", Token::Address(address)) => to = Some(format_address(&address)),
            ("value", Token::Uint(value)) => amount = Some(value),
            (name, _) => return Err(DecodeError::UnexpectedParam(name.to_string())),
        }
    }

    let (Some(from), Some(to), Some(amount)) = (from, to, amount) else {
        return Err(DecodeError::Abi(ethabi::Error::InvalidData));
    };

    let token = format_address(&log.address);
    let transaction = log
        .transaction
        .clone()
        .ok_or(DecodeError::MissingTransaction)?;

    tracing::debug!(
        block = log.block.height,
        tx_hash = %format!("{:#x}", transaction.hash),
        "Token {token} transfer from {from} to {to} amount {amount}"
    );

    Ok(TransferEvent {
        id: log.id.clone(),
        block: log.block.clone(),
        transaction,
        token,
        from,
        to,
        amount,
    })
}
