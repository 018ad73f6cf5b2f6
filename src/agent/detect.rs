//! Capability probe over the injected agents visible to the process

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use super::{Agent, Capabilities};
use crate::error::Error;

/// Which agent the user asked to connect with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    MetaMask,
    CoinbaseWallet,
    /// Any EIP-1193 agent
    Injected,
}

impl AgentKind {
    /// Whether an agent announcing `caps` satisfies this kind
    pub fn matches(&self, caps: &Capabilities) -> bool {
        match self {
            // Rabby sets isMetaMask for dapp compatibility
            AgentKind::MetaMask => caps.is_metamask && !caps.is_rabby,
            AgentKind::CoinbaseWallet => caps.is_coinbase_wallet,
            AgentKind::Injected => true,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentKind::MetaMask => write!(f, "metamask"),
            AgentKind::CoinbaseWallet => write!(f, "coinbase"),
            AgentKind::Injected => write!(f, "injected"),
        }
    }
}

impl FromStr for AgentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "metamask" => Ok(AgentKind::MetaMask),
            "coinbase" | "coinbase_wallet" => Ok(AgentKind::CoinbaseWallet),
            "injected" | "0xaddress" => Ok(AgentKind::Injected),
            _ => Err(Error::Config(format!("Unknown agent kind: {}", s))),
        }
    }
}

/// Result of a probe
pub enum Detected {
    None,
    Found(Arc<dyn Agent>),
}

impl fmt::Debug for Detected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Detected::None => write!(f, "Detected::None"),
            Detected::Found(agent) => write!(f, "Detected::Found({})", agent.name()),
        }
    }
}

/// The set of agents injected into this execution environment
#[derive(Default, Clone)]
pub struct Environment {
    agents: Vec<Arc<dyn Agent>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn inject(&mut self, agent: Arc<dyn Agent>) {
        self.agents.push(agent);
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Find the first injected agent matching `kind`
    pub fn probe(&self, kind: AgentKind) -> Detected {
        match self
            .agents
            .iter()
            .find(|agent| kind.matches(&agent.capabilities()))
        {
            Some(agent) => {
                debug!("Probe for {} found agent '{}'", kind, agent.name());
                Detected::Found(agent.clone())
            }
            None => {
                debug!(
                    "Probe for {} found nothing among {} agents",
                    kind,
                    self.agents.len()
                );
                Detected::None
            }
        }
    }
}
