//! Read-only chain access
//!
//! [`RpcClient`] talks JSON-RPC over HTTP to a public endpoint with
//! automatic retry on transient failures. [`AgentReader`] performs the
//! same reads through a connected agent. Both implement [`ChainReader`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::agent::{codes, Agent, ProviderRpcError};
use crate::config::RpcConfig;
use crate::error::{Error, Result};
use crate::network::parse_chain_id;

/// Reads the marketplace needs from a chain
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    /// Native balance in wei
    async fn balance(&self, address: Address) -> Result<U256>;

    /// `eth_call` against the latest block
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<ProviderRpcError>,
}

/// JSON-RPC client for a single HTTP endpoint
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    timeout_ms: u64,
    max_retries: u32,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a client for `url`
    pub fn new(url: impl Into<String>, config: &RpcConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
            timeout_ms: config.timeout_ms,
            max_retries: config.max_retries,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Single attempt.
    ///
    /// The outer error is a transport failure, the inner one a JSON-RPC
    /// error object returned by the node.
    pub async fn send_once(
        &self,
        method: &str,
        params: Value,
    ) -> Result<std::result::Result<Value, ProviderRpcError>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!("RPC -> {} (id {})", method, id);

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(Error::Rpc(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let parsed: JsonRpcResponse = response.json().await.map_err(|e| self.transport_error(e))?;

        Ok(match parsed.error {
            Some(err) => Err(err),
            None => Ok(parsed.result),
        })
    }

    /// Request with exponential backoff on transport failures
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(self.timeout_ms.max(100)),
            max_elapsed_time: Some(Duration::from_millis(
                self.timeout_ms * u64::from(self.max_retries.max(1)),
            )),
            ..Default::default()
        };

        let outcome = retry(backoff, || async {
            match self.send_once(method, params.clone()).await {
                Ok(outcome) => Ok(outcome),
                Err(e) if e.is_retryable() => {
                    warn!("Retryable RPC error on {}: {}", method, e);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await?;

        outcome.map_err(|e| Error::Rpc(format!("{} failed: {}", method, e)))
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::RpcTimeout(self.timeout_ms)
        } else {
            Error::Rpc(e.to_string())
        }
    }
}

#[async_trait]
impl ChainReader for RpcClient {
    async fn chain_id(&self) -> Result<u64> {
        let value = self.request("eth_chainId", json!([])).await?;
        parse_chain_id(&value)
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        let value = self.request("eth_getBalance", balance_params(address)).await?;
        parse_u256(&value)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let value = self.request("eth_call", call_params(to, &data)).await?;
        parse_bytes(&value)
    }
}

/// Chain reads routed through a connected agent
#[derive(Clone)]
pub struct AgentReader {
    agent: Arc<dyn Agent>,
}

impl AgentReader {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self { agent }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.agent
            .request(method, params)
            .await
            .map_err(|e| Error::Rpc(format!("{} failed: {}", method, e)))
    }
}

#[async_trait]
impl ChainReader for AgentReader {
    async fn chain_id(&self) -> Result<u64> {
        let value = self.request("eth_chainId", json!([])).await?;
        parse_chain_id(&value)
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        let value = self.request("eth_getBalance", balance_params(address)).await?;
        parse_u256(&value)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let value = self.request("eth_call", call_params(to, &data)).await?;
        parse_bytes(&value)
    }
}

/// Receipt of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub gas_used: U256,
    /// `false` when execution reverted
    pub status: bool,
}

impl TxReceipt {
    /// Parse an `eth_getTransactionReceipt` result; `null` means not mined yet
    pub fn from_json(value: &Value) -> Result<Option<Self>> {
        if value.is_null() {
            return Ok(None);
        }

        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Serialization(format!("Receipt missing '{}'", name)))
        };

        let block_number = crate::network::parse_quantity(field("blockNumber")?)?;
        let gas_used = parse_u256(&Value::String(field("gasUsed")?.to_string()))?;
        // Pre-Byzantium receipts carry no status; a mined receipt means success
        let status = match value.get("status").and_then(Value::as_str) {
            Some(s) => crate::network::parse_quantity(s)? == 1,
            None => true,
        };

        Ok(Some(Self {
            transaction_hash: field("transactionHash")?.to_string(),
            block_number,
            gas_used,
            status,
        }))
    }
}

pub(crate) fn balance_params(address: Address) -> Value {
    json!([address.to_checksum(None), "latest"])
}

pub(crate) fn call_params(to: Address, data: &Bytes) -> Value {
    json!([{ "to": to.to_checksum(None), "data": hex_data(data) }, "latest"])
}

pub(crate) fn hex_data(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

pub(crate) fn hex_quantity(value: U256) -> String {
    format!("0x{:x}", value)
}

pub(crate) fn parse_u256(value: &Value) -> Result<U256> {
    let s = value
        .as_str()
        .ok_or_else(|| Error::Serialization(format!("Expected hex quantity, got {}", value)))?;
    let digits = s.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| Error::Serialization(format!("Invalid quantity '{}': {}", s, e)))
}

pub(crate) fn parse_bytes(value: &Value) -> Result<Bytes> {
    let s = value
        .as_str()
        .ok_or_else(|| Error::Serialization(format!("Expected hex data, got {}", value)))?;
    hex::decode(s.trim_start_matches("0x"))
        .map(Bytes::from)
        .map_err(|e| Error::Serialization(format!("Invalid hex data: {}", e)))
}

/// Map a transport failure from an HTTP-backed agent to the EIP-1193 shape
pub(crate) fn disconnected(e: Error) -> ProviderRpcError {
    ProviderRpcError::new(codes::DISCONNECTED, e.to_string())
}
