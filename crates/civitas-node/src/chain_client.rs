//! JSON-RPC chain client.
//!
//! Talks to an Ethereum-style node over HTTP: `eth_sendTransaction` from the
//! node-managed relayer account, `eth_getTransactionReceipt` and the latest
//! block's timestamp.

use async_trait::async_trait;
use civitas_governance::{
    ChainClient, ChainError, Receipt, ReceiptStatus, TransactionRequest,
};
use civitas_types::Hash;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: serde_json::Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct RpcResponse<T> {
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    status: Option<String>,
    block_number: Option<String>,
    gas_used: String,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    timestamp: String,
}

/// [`ChainClient`] over HTTP JSON-RPC.
#[derive(Debug, Clone)]
pub struct HttpChainClient {
    url: String,
    client: reqwest::Client,
}

impl HttpChainClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// Make an RPC call. A `null` result comes back as `None`.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, ChainError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;

        if let Some(error) = body.error {
            debug!(method, code = error.code, "Chain RPC error");
            return Err(ChainError::Rejected(format!("{} ({})", error.message, error.code)));
        }
        Ok(body.result)
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn submit_transaction(&self, request: &TransactionRequest) -> Result<Hash, ChainError> {
        let tx = json!({
            "from": request.from.to_string(),
            "to": request.to.to_string(),
            "data": format!("0x{}", hex::encode(&request.data)),
            "value": quantity(request.value),
            "gas": quantity(u128::from(request.gas_limit)),
            "gasPrice": quantity(u128::from(request.gas_price)),
        });

        let hash: String = self
            .call("eth_sendTransaction", json!([tx]))
            .await?
            .ok_or_else(|| ChainError::InvalidResponse("empty transaction hash".into()))?;
        hash.parse()
            .map_err(|e| ChainError::InvalidResponse(format!("bad transaction hash: {}", e)))
    }

    async fn get_receipt(&self, tx_hash: &Hash) -> Result<Option<Receipt>, ChainError> {
        let raw: Option<RawReceipt> = self
            .call("eth_getTransactionReceipt", json!([tx_hash.to_string()]))
            .await?;
        match raw {
            Some(raw) => parse_receipt(raw),
            None => Ok(None),
        }
    }

    async fn current_block_time(&self) -> Result<u64, ChainError> {
        let block: RawBlock = self
            .call("eth_getBlockByNumber", json!(["latest", false]))
            .await?
            .ok_or_else(|| ChainError::InvalidResponse("no latest block".into()))?;
        parse_quantity(&block.timestamp)
    }
}

fn quantity(value: u128) -> String {
    format!("0x{:x}", value)
}

fn parse_quantity(value: &str) -> Result<u64, ChainError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::InvalidResponse(format!("not a hex quantity: {}", value)))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::InvalidResponse(format!("bad quantity {}: {}", value, e)))
}

/// Receipts without a block number are still pending.
fn parse_receipt(raw: RawReceipt) -> Result<Option<Receipt>, ChainError> {
    let Some(block_number) = raw.block_number.as_deref() else {
        return Ok(None);
    };
    let status = match raw.status.as_deref() {
        Some("0x1") => ReceiptStatus::Success,
        Some("0x0") => ReceiptStatus::Reverted,
        other => {
            return Err(ChainError::InvalidResponse(format!(
                "unknown receipt status {:?}",
                other
            )))
        }
    };
    Ok(Some(Receipt {
        status,
        block_number: parse_quantity(block_number)?,
        gas_used: parse_quantity(&raw.gas_used)?,
    }))
}
