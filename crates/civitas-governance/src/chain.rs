//! Chain client abstraction.
//!
//! The pipeline never talks to a node directly. Settlement batches and
//! timelock executions are submitted through [`ChainClient`], and "now" is
//! the chain's latest block time.

use async_trait::async_trait;
use civitas_types::{Address, Hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outgoing transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    #[serde(with = "crate::codec::hex_bytes")]
    pub data: Vec<u8>,
    pub value: u128,
    pub gas_limit: u64,
    pub gas_price: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub status: ReceiptStatus,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Chain client errors. All of them are treated as retryable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type ChainResult<T> = Result<T, ChainError>;

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Submit a transaction, returning its hash once accepted by the node.
    async fn submit_transaction(&self, request: &TransactionRequest) -> ChainResult<Hash>;

    /// Receipt for a mined transaction, `None` while still pending.
    async fn get_receipt(&self, tx_hash: &Hash) -> ChainResult<Option<Receipt>>;

    /// Timestamp of the latest block (unix seconds).
    async fn current_block_time(&self) -> ChainResult<u64>;
}
