//! Wallet agent abstraction
//!
//! An agent is the external signing provider a user brings along: a
//! browser-injected wallet, or a dev node with unlocked accounts. The
//! session manager only ever talks to it through the [`Agent`] trait.
//!
//! # Architecture
//!
//! ```text
//! Environment ──probe(kind)──► Arc<dyn Agent> ──request()──► wallet / node
//!                                    │
//!                                    └──subscribe()──► AgentEvent stream
//! ```

pub mod detect;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

pub use detect::{AgentKind, Detected, Environment};
pub use http::HttpAgent;

/// EIP-1193 provider error codes
pub mod codes {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const DISCONNECTED: i64 = 4900;
    pub const CHAIN_DISCONNECTED: i64 = 4901;
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    pub const INTERNAL: i64 = -32603;
}

/// Error returned by an agent for a single request
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("[{code}] {message}")]
pub struct ProviderRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProviderRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn user_rejected() -> Self {
        Self::new(codes::USER_REJECTED, "User rejected the request")
    }

    pub fn unrecognized_chain(chain_id: u64) -> Self {
        Self::new(
            codes::UNRECOGNIZED_CHAIN,
            format!("Unrecognized chain ID \"0x{:x}\"", chain_id),
        )
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == codes::USER_REJECTED
    }

    pub fn is_unrecognized_chain(&self) -> bool {
        self.code == codes::UNRECOGNIZED_CHAIN
    }

    /// Nodes and wallets report this one only through the message text
    pub fn is_insufficient_funds(&self) -> bool {
        self.message.to_ascii_lowercase().contains("insufficient funds")
    }
}

/// Notifications an agent pushes after a connection is established
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// New account list; empty means the user disconnected every account
    AccountsChanged(Vec<String>),
    /// New active chain id
    ChainChanged(u64),
}

/// Flags an injected provider announces about itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub is_metamask: bool,
    pub is_coinbase_wallet: bool,
    pub is_rabby: bool,
}

/// An external signing agent (EIP-1193 provider)
#[async_trait]
pub trait Agent: Send + Sync {
    /// Human-readable agent name for logs
    fn name(&self) -> &str;

    /// Capability flags used by the environment probe
    fn capabilities(&self) -> Capabilities;

    /// Submit a single JSON-RPC style request
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError>;

    /// Subscribe to `accountsChanged` / `chainChanged` notifications.
    ///
    /// Dropping the receiver removes the listener.
    fn subscribe(&self) -> broadcast::Receiver<AgentEvent>;
}
