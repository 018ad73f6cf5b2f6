//! Error types for the wallet session manager

use thiserror::Error;

use crate::agent::ProviderRpcError;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for wallet sessions and marketplace calls
#[derive(Error, Debug)]
pub enum Error {
    // Agent / session errors
    #[error("No matching wallet agent found: {0}")]
    AgentNotFound(String),

    #[error("User rejected the account access request")]
    UserRejected,

    #[error("A connect request is already in progress")]
    ConnectInProgress,

    #[error("Connect was cancelled by a disconnect")]
    ConnectCancelled,

    #[error("No wallet connected")]
    NotConnected,

    #[error("Agent error: {0}")]
    Agent(ProviderRpcError),

    // Network errors
    #[error("Unknown network: chain id {0} is not configured")]
    UnknownNetwork(u64),

    #[error("Network switch failed: {0}")]
    SwitchFailed(String),

    // Transaction errors
    #[error("User rejected the transaction")]
    TransactionRejected,

    #[error("Transaction reverted: {0}")]
    TransactionReverted(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Timed out after {0}s waiting for transaction receipt")]
    ReceiptTimeout(u64),

    // Encoding errors
    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Rpc(_) | Error::RpcTimeout(_))
    }

    /// Check if the user dismissed a wallet prompt
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, Error::UserRejected | Error::TransactionRejected)
    }

    /// Check if the session is left in a well-defined state after this error.
    ///
    /// Every wallet-facing failure is recoverable; only configuration,
    /// I/O and wrapped foreign errors are treated as fatal for the caller.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Config(_) | Error::Io(_) | Error::Anyhow(_))
    }
}

impl From<ProviderRpcError> for Error {
    fn from(e: ProviderRpcError) -> Self {
        if e.is_user_rejection() {
            Error::UserRejected
        } else {
            Error::Agent(e)
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Rpc(e.to_string())
    }
}

impl From<alloy_sol_types::Error> for Error {
    fn from(e: alloy_sol_types::Error) -> Self {
        Error::Abi(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
