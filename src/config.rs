//! Configuration loading and validation

use std::path::Path;

use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;

use crate::agent::AgentKind;
use crate::network::{default_networks, NetworkConfig, NetworkRegistry};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default = "default_networks")]
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub transactions: TransactionConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
}

/// Which agent to connect with, and where the CLI finds a node-backed one
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_kind")]
    pub kind: String,
    #[serde(default = "default_agent_rpc_url")]
    pub rpc_url: String,
    /// How often a node-backed agent polls for account/chain changes
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Deployed contract addresses (empty until deployed)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractsConfig {
    #[serde(default)]
    pub marketplace: String,
    #[serde(default)]
    pub reward_token: String,
    #[serde(default)]
    pub aggregator: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Run the signed-message ownership challenge right after connect
    #[serde(default = "default_true")]
    pub verify_on_connect: bool,
    /// Fractional digits shown for balances
    #[serde(default = "default_balance_decimals")]
    pub balance_decimals: u8,
    /// Chain the CLI switches to when none is given
    #[serde(default = "default_chain_id")]
    pub default_chain_id: u64,
    /// Move to `default_chain_id` after connecting on an unsupported chain
    #[serde(default)]
    pub auto_switch: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionConfig {
    #[serde(default = "default_receipt_poll_ms")]
    pub receipt_poll_ms: u64,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
}

/// Read-only JSON-RPC client settings
#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_true() -> bool {
    true
}

fn default_agent_kind() -> String {
    "injected".to_string()
}

fn default_agent_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_balance_decimals() -> u8 {
    4
}

fn default_chain_id() -> u64 {
    57000
}

fn default_receipt_poll_ms() -> u64 {
    1000
}

fn default_receipt_timeout_secs() -> u64 {
    120
}

fn default_timeout_ms() -> u64 {
    10000
}

fn default_max_retries() -> u32 {
    3
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            kind: default_agent_kind(),
            rpc_url: default_agent_rpc_url(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verify_on_connect: true,
            balance_decimals: default_balance_decimals(),
            default_chain_id: default_chain_id(),
            auto_switch: false,
        }
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            receipt_poll_ms: default_receipt_poll_ms(),
            receipt_timeout_secs: default_receipt_timeout_secs(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            networks: default_networks(),
            contracts: ContractsConfig::default(),
            session: SessionConfig::default(),
            transactions: TransactionConfig::default(),
            rpc: RpcConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("agent.kind", default_agent_kind())?
            .set_default("agent.rpc_url", default_agent_rpc_url())?
            .set_default("rpc.timeout_ms", default_timeout_ms() as i64)?
            .set_default("rpc.max_retries", default_max_retries() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix RAMPWOOL_)
            .add_source(
                config::Environment::with_prefix("RAMPWOOL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.agent_kind()?;

        url::Url::parse(&self.agent.rpc_url)
            .with_context(|| format!("Invalid agent.rpc_url: {}", self.agent.rpc_url))?;

        if self.agent.poll_interval_ms == 0 {
            anyhow::bail!("agent.poll_interval_ms must be positive");
        }

        if self.networks.is_empty() {
            anyhow::bail!("At least one network must be configured");
        }

        let registry = self.network_registry()?;

        for network in registry.iter() {
            url::Url::parse(&network.rpc_url).with_context(|| {
                format!("Invalid rpc_url for network {}: {}", network.chain_id, network.rpc_url)
            })?;
            url::Url::parse(&network.block_explorer).with_context(|| {
                format!(
                    "Invalid block_explorer for network {}: {}",
                    network.chain_id, network.block_explorer
                )
            })?;
        }

        if !registry.contains(self.session.default_chain_id) {
            anyhow::bail!(
                "session.default_chain_id {} is not a configured network",
                self.session.default_chain_id
            );
        }

        if self.session.balance_decimals > 18 {
            anyhow::bail!("session.balance_decimals cannot exceed 18");
        }

        // Validate contract addresses
        for (name, value) in [
            ("marketplace", &self.contracts.marketplace),
            ("reward_token", &self.contracts.reward_token),
            ("aggregator", &self.contracts.aggregator),
        ] {
            if !value.is_empty() {
                value
                    .parse::<Address>()
                    .with_context(|| format!("Invalid contracts.{} address: {}", name, value))?;
            }
        }

        if self.transactions.receipt_poll_ms == 0 {
            anyhow::bail!("transactions.receipt_poll_ms must be positive");
        }

        if self.transactions.receipt_timeout_secs == 0 {
            anyhow::bail!("transactions.receipt_timeout_secs must be positive");
        }

        Ok(())
    }

    /// Parsed agent kind
    pub fn agent_kind(&self) -> Result<AgentKind> {
        self.agent
            .kind
            .parse()
            .with_context(|| format!("Invalid agent.kind: {}", self.agent.kind))
    }

    /// Build the network lookup table
    pub fn network_registry(&self) -> Result<NetworkRegistry> {
        NetworkRegistry::new(self.networks.clone()).context("Invalid network table")
    }

    /// Marketplace contract address; fails until the contract is deployed
    pub fn marketplace_address(&self) -> crate::error::Result<Address> {
        if self.contracts.marketplace.is_empty() {
            return Err(crate::error::Error::Config(
                "contracts.marketplace is not set".to_string(),
            ));
        }
        self.contracts
            .marketplace
            .parse()
            .map_err(|_| crate::error::Error::InvalidAddress(self.contracts.marketplace.clone()))
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let networks: Vec<String> = self
            .networks
            .iter()
            .map(|n| format!("    {} ({}): {}", n.name, n.chain_id, mask_url(&n.rpc_url)))
            .collect();

        format!(
            r#"Configuration:
  Agent:
    kind: {}
    rpc_url: {}
    poll_interval: {}ms
  Networks:
{}
  Contracts:
    marketplace: {}
    reward_token: {}
    aggregator: {}
  Session:
    verify_on_connect: {}
    balance_decimals: {}
    default_chain_id: {}
    auto_switch: {}
  Transactions:
    receipt_poll: {}ms
    receipt_timeout: {}s
  RPC:
    timeout: {}ms
    max_retries: {}
"#,
            self.agent.kind,
            mask_url(&self.agent.rpc_url),
            self.agent.poll_interval_ms,
            networks.join("\n"),
            display_or_unset(&self.contracts.marketplace),
            display_or_unset(&self.contracts.reward_token),
            display_or_unset(&self.contracts.aggregator),
            self.session.verify_on_connect,
            self.session.balance_decimals,
            self.session.default_chain_id,
            self.session.auto_switch,
            self.transactions.receipt_poll_ms,
            self.transactions.receipt_timeout_secs,
            self.rpc.timeout_ms,
            self.rpc.max_retries,
        )
    }
}

fn display_or_unset(value: &str) -> &str {
    if value.is_empty() {
        "(not set)"
    } else {
        value
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}
