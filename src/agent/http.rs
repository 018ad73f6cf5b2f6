//! Agent backed by a JSON-RPC node with unlocked accounts
//!
//! Used against local Hardhat/Anvil nodes. Nodes do not push
//! notifications, so account and chain changes are detected by polling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::{Agent, AgentEvent, Capabilities, ProviderRpcError};
use crate::config::RpcConfig;
use crate::error::Result;
use crate::network::parse_chain_id;
use crate::rpc::{disconnected, RpcClient};

/// EIP-1193 agent over HTTP JSON-RPC
pub struct HttpAgent {
    name: String,
    client: Arc<RpcClient>,
    events: broadcast::Sender<AgentEvent>,
    /// Shutdown signal for the polling task
    shutdown: broadcast::Sender<()>,
}

impl HttpAgent {
    pub fn new(url: &str, rpc: &RpcConfig) -> Result<Self> {
        let client = Arc::new(RpcClient::new(url, rpc)?);
        let (events, _) = broadcast::channel(16);
        let (shutdown, _) = broadcast::channel(1);

        Ok(Self {
            name: format!("http:{}", url),
            client,
            events,
            shutdown,
        })
    }

    /// Start polling `eth_accounts` / `eth_chainId` for changes
    pub fn start_polling(&self, poll_interval: Duration) {
        info!(
            "Polling {} for account/chain changes every {}ms",
            self.client.url(),
            poll_interval.as_millis()
        );

        let client = self.client.clone();
        let events = self.events.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            let mut last: Option<(Vec<String>, u64)> = None;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let current = match poll_once(&client).await {
                            Ok(current) => current,
                            Err(e) => {
                                warn!("Agent poll failed: {}", e);
                                continue;
                            }
                        };

                        if let Some((accounts, chain_id)) = &last {
                            if *accounts != current.0 {
                                debug!("Node accounts changed: {:?}", current.0);
                                let _ = events.send(AgentEvent::AccountsChanged(current.0.clone()));
                            }
                            if *chain_id != current.1 {
                                debug!("Node chain changed: {}", current.1);
                                let _ = events.send(AgentEvent::ChainChanged(current.1));
                            }
                        }
                        last = Some(current);
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Agent polling shutting down");
                        break;
                    }
                }
            }
        });
    }
}

impl Drop for HttpAgent {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

async fn poll_once(client: &RpcClient) -> Result<(Vec<String>, u64)> {
    let accounts = client.request("eth_accounts", Value::Array(vec![])).await?;
    let accounts: Vec<String> = serde_json::from_value(accounts)?;
    let chain_id = parse_chain_id(&client.request("eth_chainId", Value::Array(vec![])).await?)?;
    Ok((accounts, chain_id))
}

#[async_trait]
impl Agent for HttpAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn request(&self, method: &str, params: Value) -> std::result::Result<Value, ProviderRpcError> {
        // Unlocked node accounts need no authorization prompt
        let method = match method {
            "eth_requestAccounts" => "eth_accounts",
            other => other,
        };

        self.client
            .send_once(method, params)
            .await
            .map_err(disconnected)?
    }

    fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }
}
