//! Supported chain descriptors
//!
//! The registry is immutable once built and is consulted when the agent
//! reports that it does not know a chain we asked it to switch to.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Native currency of a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Static descriptor of a supported chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub block_explorer: String,
    pub native_currency: NativeCurrency,
}

/// Parameter object for `wallet_addEthereumChain` (EIP-3085)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChainParameter {
    pub chain_id: String,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

impl NetworkConfig {
    /// Build the `wallet_addEthereumChain` parameter for this network
    pub fn add_chain_parameter(&self) -> AddChainParameter {
        AddChainParameter {
            chain_id: chain_id_to_hex(self.chain_id),
            chain_name: self.name.clone(),
            native_currency: self.native_currency.clone(),
            rpc_urls: vec![self.rpc_url.clone()],
            block_explorer_urls: vec![self.block_explorer.clone()],
        }
    }

    /// Explorer link for a transaction hash
    pub fn tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.block_explorer.trim_end_matches('/'), tx_hash)
    }
}

/// Lookup table of known networks keyed by chain id
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    networks: BTreeMap<u64, NetworkConfig>,
}

impl NetworkRegistry {
    /// Build a registry, rejecting duplicate or zero chain ids
    pub fn new(networks: Vec<NetworkConfig>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for network in networks {
            if network.chain_id == 0 {
                return Err(Error::Config(format!(
                    "Network '{}' has chain id 0",
                    network.name
                )));
            }
            let chain_id = network.chain_id;
            if map.insert(chain_id, network).is_some() {
                return Err(Error::Config(format!("Duplicate chain id {}", chain_id)));
            }
        }
        Ok(Self { networks: map })
    }

    pub fn get(&self, chain_id: u64) -> Option<&NetworkConfig> {
        self.networks.get(&chain_id)
    }

    pub fn contains(&self, chain_id: u64) -> bool {
        self.networks.contains_key(&chain_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkConfig> {
        self.networks.values()
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

/// Networks the marketplace is deployed to (plus a local dev node)
pub fn default_networks() -> Vec<NetworkConfig> {
    let sys = |symbol: &str| NativeCurrency {
        name: "Syscoin".to_string(),
        symbol: symbol.to_string(),
        decimals: 18,
    };

    vec![
        NetworkConfig {
            chain_id: 570,
            name: "Rollux".to_string(),
            rpc_url: "https://rpc.rollux.com".to_string(),
            block_explorer: "https://explorer.rollux.com".to_string(),
            native_currency: sys("SYS"),
        },
        NetworkConfig {
            chain_id: 57000,
            name: "Rollux Testnet".to_string(),
            rpc_url: "https://rpc-tanenbaum.rollux.com".to_string(),
            block_explorer: "https://rollux.tanenbaum.io".to_string(),
            native_currency: sys("tSYS"),
        },
        NetworkConfig {
            chain_id: 57,
            name: "Syscoin NEVM".to_string(),
            rpc_url: "https://rpc.syscoin.org".to_string(),
            block_explorer: "https://explorer.syscoin.org".to_string(),
            native_currency: sys("SYS"),
        },
        NetworkConfig {
            chain_id: 5700,
            name: "Syscoin Tanenbaum".to_string(),
            rpc_url: "https://rpc.tanenbaum.io".to_string(),
            block_explorer: "https://tanenbaum.io".to_string(),
            native_currency: sys("tSYS"),
        },
        NetworkConfig {
            chain_id: 1337,
            name: "Localhost".to_string(),
            rpc_url: "http://127.0.0.1:8545".to_string(),
            block_explorer: "http://127.0.0.1:8545".to_string(),
            native_currency: NativeCurrency {
                name: "Ether".to_string(),
                symbol: "ETH".to_string(),
                decimals: 18,
            },
        },
    ]
}

/// Encode a chain id the way EIP-1193 agents expect (`0x`-prefixed hex)
pub fn chain_id_to_hex(chain_id: u64) -> String {
    format!("0x{:x}", chain_id)
}

/// Parse a chain id reported by an agent; accepts hex strings, decimal
/// strings and JSON numbers.
pub fn parse_chain_id(value: &serde_json::Value) -> Result<u64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| Error::Serialization(format!("Invalid chain id: {}", n))),
        serde_json::Value::String(s) => parse_quantity(s),
        other => Err(Error::Serialization(format!("Invalid chain id: {}", other))),
    }
}

/// Parse a JSON-RPC quantity (`0x`-prefixed hex, or decimal) into u64
pub fn parse_quantity(s: &str) -> Result<u64> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    parsed.map_err(|e| Error::Serialization(format!("Invalid quantity '{}': {}", s, e)))
}
