//! RampWool Wallet Session Manager
//!
//! Connects to an external EIP-1193 wallet agent, keeps one authoritative
//! session (address, chain, balance, ownership verification) in sync with
//! agent notifications, and submits marketplace transactions through it.

pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod manager;
pub mod marketplace;
pub mod network;
pub mod rpc;
pub mod session;
pub mod units;
pub mod verify;

// Re-export commonly used types
pub use agent::{Agent, AgentEvent, AgentKind, Environment, ProviderRpcError};
pub use config::Config;
pub use error::{Error, Result};
pub use manager::{SessionSettings, WalletSessionManager};
pub use network::{NetworkConfig, NetworkRegistry};
pub use session::{Session, SessionState};
