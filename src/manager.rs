//! Wallet session manager - owns the connection to the user's agent
//!
//! Holds the one authoritative [`Session`] and serializes every change to
//! it: connect, disconnect and agent notifications all go through here.
//! Observers read snapshots or follow the [`watch`] channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use alloy_primitives::Address;
use chrono::Utc;
use serde_json::json;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentEvent, AgentKind, Detected, Environment, ProviderRpcError};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::marketplace::TransactionRequest;
use crate::network::{chain_id_to_hex, parse_chain_id, NetworkRegistry};
use crate::rpc::{hex_data, hex_quantity, AgentReader, ChainReader, TxReceipt};
use crate::session::{AccountsOutcome, Session, SessionState, ZERO_BALANCE};
use crate::units::{checksum_address, format_ether};
use crate::verify::{challenge_message, parse_signature, personal_sign_params, signed_by};

/// Session manager settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Run the ownership challenge right after connect
    pub verify_on_connect: bool,
    /// Fractional digits shown for balances
    pub balance_decimals: u8,
    /// Interval between receipt polls
    pub receipt_poll: Duration,
    /// Give up waiting for a receipt after this long
    pub receipt_timeout: Duration,
    /// Switch here after connecting if the agent is on an unsupported chain
    pub auto_switch_to: Option<u64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            verify_on_connect: true,
            balance_decimals: 4,
            receipt_poll: Duration::from_millis(1000),
            receipt_timeout: Duration::from_secs(120),
            auto_switch_to: None,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            verify_on_connect: config.session.verify_on_connect,
            balance_decimals: config.session.balance_decimals,
            receipt_poll: Duration::from_millis(config.transactions.receipt_poll_ms),
            receipt_timeout: Duration::from_secs(config.transactions.receipt_timeout_secs),
            auto_switch_to: config
                .session
                .auto_switch
                .then_some(config.session.default_chain_id),
        }
    }
}

/// Agent notification subscription; aborts the handler task on drop
struct ListenerGuard {
    handle: JoinHandle<()>,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Inner {
    session: Session,
    agent: Option<Arc<dyn Agent>>,
    kind: Option<AgentKind>,
    listener: Option<ListenerGuard>,
}

struct Shared {
    inner: RwLock<Inner>,
    updates: watch::Sender<Session>,
    connecting: AtomicBool,
    /// Bumped by every disconnect; a connect that sees it move is stale
    epoch: AtomicU64,
    balance_decimals: u8,
}

impl Shared {
    fn publish(&self, session: &Session) {
        self.updates.send_replace(session.clone());
    }

    /// Fetch the balance for `address` and store it if the session still
    /// belongs to that address. Failures leave the previous value in place.
    async fn refresh_balance(&self, agent: Arc<dyn Agent>, address: &str) -> Result<()> {
        let parsed: Address = address
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_string()))?;
        let wei = AgentReader::new(agent).balance(parsed).await?;
        let formatted = format_ether(wei, self.balance_decimals);

        let mut inner = self.inner.write().await;
        if inner.session.set_balance(address, formatted) {
            self.publish(&inner.session);
        } else {
            debug!("Dropping stale balance for {}", address);
        }
        Ok(())
    }

    /// Apply one agent notification. Returns false once the session is gone.
    async fn handle_event(&self, event: AgentEvent) -> bool {
        match event {
            AgentEvent::AccountsChanged(accounts) => {
                let accounts = normalize_accounts(&accounts);

                let mut inner = self.inner.write().await;
                // Raced with disconnect
                if inner.agent.is_none() {
                    return false;
                }
                match inner.session.apply_accounts_changed(&accounts) {
                    AccountsOutcome::Disconnected => {
                        info!("Agent reported no accounts, disconnecting");
                        inner.agent = None;
                        inner.kind = None;
                        self.publish(&inner.session);
                        let listener = inner.listener.take();
                        drop(inner);
                        drop(listener);
                        false
                    }
                    AccountsOutcome::Switched(address) => {
                        info!("Account changed to {}", address);
                        self.publish(&inner.session);
                        let agent = inner.agent.clone();
                        drop(inner);

                        if let Some(agent) = agent {
                            if let Err(e) = self.refresh_balance(agent, &address).await {
                                warn!("Balance refresh after account change failed: {}", e);
                            }
                        }
                        true
                    }
                }
            }
            AgentEvent::ChainChanged(chain_id) => {
                let mut inner = self.inner.write().await;
                if inner.agent.is_none() {
                    return false;
                }
                inner.session.apply_chain_changed(chain_id);
                info!("Chain changed to {}", chain_id);
                self.publish(&inner.session);
                let agent = inner.agent.clone();
                let address = inner.session.address().map(str::to_string);
                drop(inner);

                if let (Some(agent), Some(address)) = (agent, address) {
                    if let Err(e) = self.refresh_balance(agent, &address).await {
                        warn!("Balance refresh after chain change failed: {}", e);
                    }
                }
                true
            }
        }
    }
}

fn normalize_accounts(accounts: &[String]) -> Vec<String> {
    accounts
        .iter()
        .map(|a| checksum_address(a).unwrap_or_else(|_| a.clone()))
        .collect()
}

/// Apply notifications the agent sent while connect was in flight.
///
/// Returns true if the stored balance no longer matches the session.
fn apply_pending(session: &mut Session, events: &mut broadcast::Receiver<AgentEvent>) -> bool {
    let mut stale_balance = false;
    loop {
        match events.try_recv() {
            Ok(AgentEvent::AccountsChanged(accounts)) => {
                if let AccountsOutcome::Switched(_) =
                    session.apply_accounts_changed(&normalize_accounts(&accounts))
                {
                    stale_balance = true;
                }
            }
            Ok(AgentEvent::ChainChanged(chain_id)) => {
                session.apply_chain_changed(chain_id);
                stale_balance = true;
            }
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!("Skipped {} agent notifications during connect", skipped);
            }
            Err(_) => break,
        }
    }
    stale_balance
}

/// How accounts are obtained when opening a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    /// `eth_requestAccounts`; the agent may prompt the user
    Prompt,
    /// `eth_accounts`; only accounts already authorized
    Silent,
}

impl Access {
    fn method(self) -> &'static str {
        match self {
            Access::Prompt => "eth_requestAccounts",
            Access::Silent => "eth_accounts",
        }
    }
}

/// Spawn the notification handler for a freshly connected agent
fn spawn_listener(shared: Weak<Shared>, mut events: broadcast::Receiver<AgentEvent>) -> ListenerGuard {
    let handle = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Listener lagged, skipped {} agent notifications", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Agent notification stream closed");
                    break;
                }
            };

            // Manager dropped: nothing left to update
            let Some(shared) = shared.upgrade() else {
                break;
            };

            debug!("Agent notification: {:?}", event);
            if !shared.handle_event(event).await {
                break;
            }
        }
    });

    ListenerGuard { handle }
}

/// Owns the connection to one external agent at a time
pub struct WalletSessionManager {
    environment: Environment,
    networks: Arc<NetworkRegistry>,
    settings: SessionSettings,
    shared: Arc<Shared>,
    connect_lock: Mutex<()>,
}

impl WalletSessionManager {
    /// Create a disconnected manager
    pub fn new(environment: Environment, networks: NetworkRegistry, settings: SessionSettings) -> Self {
        let (updates, _) = watch::channel(Session::default());

        let shared = Arc::new(Shared {
            inner: RwLock::new(Inner {
                session: Session::default(),
                agent: None,
                kind: None,
                listener: None,
            }),
            updates,
            connecting: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            balance_decimals: settings.balance_decimals,
        });

        Self {
            environment,
            networks: Arc::new(networks),
            settings,
            shared,
            connect_lock: Mutex::new(()),
        }
    }

    /// Snapshot of the current session
    pub async fn session(&self) -> Session {
        self.shared.inner.read().await.session.clone()
    }

    /// Follow session changes
    pub fn watch(&self) -> watch::Receiver<Session> {
        self.shared.updates.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        if self.shared.connecting.load(Ordering::SeqCst) {
            return SessionState::Connecting;
        }
        self.shared.inner.read().await.session.state()
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.inner.read().await.session.is_connected()
    }

    pub async fn agent_kind(&self) -> Option<AgentKind> {
        self.shared.inner.read().await.kind
    }

    pub fn networks(&self) -> &NetworkRegistry {
        &self.networks
    }

    /// Chain reads through the connected agent
    pub async fn reader(&self) -> Result<AgentReader> {
        Ok(AgentReader::new(self.connected_agent().await?))
    }

    /// Whether the session is on a chain from the network table
    pub async fn is_supported_network(&self) -> bool {
        self.shared
            .inner
            .read()
            .await
            .session
            .chain_id()
            .is_some_and(|chain_id| self.networks.contains(chain_id))
    }

    /// Connect to the agent of `kind`.
    ///
    /// Requests account access, reads chain and balance, stores the new
    /// session in one step, subscribes to agent notifications and then
    /// runs the ownership challenge if configured.
    pub async fn connect(&self, kind: AgentKind) -> Result<Session> {
        self.open(kind, Access::Prompt)
            .await?
            .ok_or(Error::UserRejected)
    }

    /// Pick up a session the agent already authorized, without prompting.
    ///
    /// Returns `Ok(None)` when the agent holds no authorized account.
    /// The restored session is unverified.
    pub async fn restore(&self, kind: AgentKind) -> Result<Option<Session>> {
        self.open(kind, Access::Silent).await
    }

    async fn open(&self, kind: AgentKind, access: Access) -> Result<Option<Session>> {
        let _connecting = self
            .connect_lock
            .try_lock()
            .map_err(|_| Error::ConnectInProgress)?;

        let agent = match self.environment.probe(kind) {
            Detected::Found(agent) => agent,
            Detected::None => return Err(Error::AgentNotFound(kind.to_string())),
        };

        match access {
            Access::Prompt => info!("Connecting to {} agent '{}'", kind, agent.name()),
            Access::Silent => info!("Restoring session from {} agent '{}'", kind, agent.name()),
        }

        // Subscribe first so changes made during the prompt are not lost
        let mut events = agent.subscribe();
        let epoch = self.shared.epoch.load(Ordering::SeqCst);

        self.shared.connecting.store(true, Ordering::SeqCst);
        let established = self.establish(&agent, access).await;
        self.shared.connecting.store(false, Ordering::SeqCst);
        let Some((address, chain_id, balance)) = established? else {
            debug!("Agent holds no authorized account");
            return Ok(None);
        };

        let (address, chain_id, stale_balance) = {
            let mut inner = self.shared.inner.write().await;

            if self.shared.epoch.load(Ordering::SeqCst) != epoch {
                info!("Connect to {} cancelled by disconnect", address);
                return Err(Error::ConnectCancelled);
            }

            let mut session = Session::connected(address, chain_id, balance);
            let stale_balance = apply_pending(&mut session, &mut events);
            let (Some(address), Some(chain_id)) =
                (session.address().map(str::to_string), session.chain_id())
            else {
                info!("Agent revoked account access during connect");
                return match access {
                    Access::Prompt => Err(Error::UserRejected),
                    Access::Silent => Ok(None),
                };
            };

            // Release the previous subscription before taking a new one
            drop(inner.listener.take());

            inner.session = session;
            inner.agent = Some(agent.clone());
            inner.kind = Some(kind);
            inner.listener = Some(spawn_listener(Arc::downgrade(&self.shared), events));
            self.shared.publish(&inner.session);
            (address, chain_id, stale_balance)
        };

        info!("Connected {} on chain {}", address, chain_id);

        if stale_balance {
            if let Err(e) = self.shared.refresh_balance(agent.clone(), &address).await {
                warn!("Balance refresh after connect failed: {}", e);
            }
        }

        if let Some(target) = self.settings.auto_switch_to {
            if !self.networks.contains(chain_id) {
                info!("Chain {} is not supported, switching to {}", chain_id, target);
                if let Err(e) = self.switch_network(target).await {
                    warn!("Automatic network switch failed: {}", e);
                }
            }
        }

        if access == Access::Prompt && self.settings.verify_on_connect {
            self.verify_ownership(&address).await;
        }

        Ok(Some(self.session().await))
    }

    /// Read accounts, chain id and balance; touches no session state.
    ///
    /// `None` means the agent returned no accounts without prompting.
    async fn establish(
        &self,
        agent: &Arc<dyn Agent>,
        access: Access,
    ) -> Result<Option<(String, u64, String)>> {
        let accounts = agent
            .request(access.method(), json!([]))
            .await
            .map_err(Error::from)?;
        let accounts: Vec<String> = serde_json::from_value(accounts)?;
        let first = match (accounts.first(), access) {
            (Some(first), _) => first,
            (None, Access::Prompt) => return Err(Error::UserRejected),
            (None, Access::Silent) => return Ok(None),
        };
        let address = checksum_address(first)?;

        let chain_id = parse_chain_id(&agent.request("eth_chainId", json!([])).await?)?;

        let balance = match AgentReader::new(agent.clone())
            .balance(address.parse().map_err(|_| Error::InvalidAddress(address.clone()))?)
            .await
        {
            Ok(wei) => format_ether(wei, self.settings.balance_decimals),
            Err(e) => {
                warn!("Balance fetch on connect failed: {}", e);
                ZERO_BALANCE.to_string()
            }
        };

        Ok(Some((address, chain_id, balance)))
    }

    /// Clear the session and release agent listeners. Idempotent.
    ///
    /// A connect still waiting on the agent is abandoned.
    pub async fn disconnect(&self) {
        let listener = {
            let mut inner = self.shared.inner.write().await;
            self.shared.epoch.fetch_add(1, Ordering::SeqCst);
            self.shared.connecting.store(false, Ordering::SeqCst);
            let was_connected = inner.session.is_connected();
            inner.session.clear();
            inner.agent = None;
            inner.kind = None;
            self.shared.publish(&inner.session);
            if was_connected {
                info!("Disconnected");
            }
            inner.listener.take()
        };
        drop(listener);
    }

    /// Ask the agent to switch chains, adding the chain from the network
    /// table if the agent does not know it.
    ///
    /// Session.chainId follows from the agent's own chain-changed notification.
    pub async fn switch_network(&self, chain_id: u64) -> Result<()> {
        let agent = self.connected_agent().await?;
        info!("Requesting switch to chain {}", chain_id);

        let params = json!([{ "chainId": chain_id_to_hex(chain_id) }]);
        match agent.request("wallet_switchEthereumChain", params).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_unrecognized_chain() => {
                let network = self
                    .networks
                    .get(chain_id)
                    .ok_or(Error::UnknownNetwork(chain_id))?;

                info!("Agent does not know chain {}, adding {}", chain_id, network.name);
                agent
                    .request(
                        "wallet_addEthereumChain",
                        json!([network.add_chain_parameter()]),
                    )
                    .await
                    .map_err(|e| Error::SwitchFailed(e.to_string()))?;
                Ok(())
            }
            Err(e) => Err(Error::SwitchFailed(e.to_string())),
        }
    }

    /// Run the signed-message challenge for `address`.
    ///
    /// Returns whether the session is verified afterwards. Rejections and
    /// mismatches are logged and leave the session unverified but connected.
    pub async fn verify_ownership(&self, address: &str) -> bool {
        let agent = match self.connected_agent().await {
            Ok(agent) => agent,
            Err(e) => {
                warn!("Ownership verification skipped: {}", e);
                return false;
            }
        };

        let message = challenge_message(address, Utc::now());
        let signature = agent
            .request("personal_sign", personal_sign_params(&message, address))
            .await
            .map_err(Error::from)
            .and_then(|value| parse_signature(&value));

        let verified = match signature {
            Ok(signature) if signed_by(&message, &signature, address) => true,
            Ok(_) => {
                warn!("Ownership verification failed: signer does not match {}", address);
                false
            }
            Err(e) => {
                warn!("Ownership verification failed: {}", e);
                false
            }
        };

        let mut inner = self.shared.inner.write().await;
        if verified {
            if inner.session.mark_verified(address) {
                info!("Verified ownership of {}", address);
                self.shared.publish(&inner.session);
                return true;
            }
            warn!("Session moved away from {} during verification", address);
            return false;
        }

        // A failed re-challenge downgrades the current account
        if inner.session.revoke_verification(address) {
            self.shared.publish(&inner.session);
        }
        false
    }

    /// Re-read the balance of the connected account
    pub async fn refresh_balance(&self) -> Result<()> {
        let (agent, address) = {
            let inner = self.shared.inner.read().await;
            let agent = inner.agent.clone().ok_or(Error::NotConnected)?;
            let address = inner
                .session
                .address()
                .map(str::to_string)
                .ok_or(Error::NotConnected)?;
            (agent, address)
        };
        self.shared.refresh_balance(agent, &address).await
    }

    /// Submit a contract call through the connected agent and wait until it is mined
    pub async fn submit_transaction(&self, request: TransactionRequest) -> Result<TxReceipt> {
        request.validate()?;

        let (agent, from) = {
            let inner = self.shared.inner.read().await;
            let agent = inner.agent.clone().ok_or(Error::NotConnected)?;
            let from = inner
                .session
                .address()
                .map(str::to_string)
                .ok_or(Error::NotConnected)?;
            (agent, from)
        };

        if !request.value.is_zero() {
            let from_address: Address = from
                .parse()
                .map_err(|_| Error::InvalidAddress(from.clone()))?;
            match AgentReader::new(agent.clone()).balance(from_address).await {
                Ok(balance) if balance < request.value => {
                    return Err(Error::InsufficientFunds(format!(
                        "{} wei available, {} wei required",
                        balance, request.value
                    )));
                }
                Ok(_) => {}
                Err(e) => warn!("Pre-flight balance check failed: {}", e),
            }
        }

        let tx = json!([{
            "from": from,
            "to": request.to.to_checksum(None),
            "data": hex_data(&request.calldata()),
            "value": hex_quantity(request.value),
        }]);

        info!("Submitting {} to {}", request.call, request.to);

        let hash = agent
            .request("eth_sendTransaction", tx)
            .await
            .map_err(send_error)?;
        let hash = hash
            .as_str()
            .ok_or_else(|| Error::Serialization(format!("Expected transaction hash, got {}", hash)))?
            .to_string();

        debug!("Transaction {} sent, waiting for receipt", hash);
        let receipt = self.wait_for_receipt(agent.as_ref(), &hash).await?;

        if !receipt.status {
            return Err(Error::TransactionReverted(format!(
                "{} reverted in {}",
                request.call.method_name(),
                hash
            )));
        }

        info!(
            "{} mined in block {} ({})",
            request.call.method_name(),
            receipt.block_number,
            hash
        );
        Ok(receipt)
    }

    async fn wait_for_receipt(&self, agent: &dyn Agent, hash: &str) -> Result<TxReceipt> {
        let poll = async {
            loop {
                match agent
                    .request("eth_getTransactionReceipt", json!([hash]))
                    .await
                {
                    Ok(value) => {
                        if let Some(receipt) = TxReceipt::from_json(&value)? {
                            return Ok::<_, Error>(receipt);
                        }
                    }
                    Err(e) => warn!("Receipt poll for {} failed: {}", hash, e),
                }
                tokio::time::sleep(self.settings.receipt_poll).await;
            }
        };

        tokio::time::timeout(self.settings.receipt_timeout, poll)
            .await
            .map_err(|_| Error::ReceiptTimeout(self.settings.receipt_timeout.as_secs()))?
    }

    async fn connected_agent(&self) -> Result<Arc<dyn Agent>> {
        self.shared
            .inner
            .read()
            .await
            .agent
            .clone()
            .ok_or(Error::NotConnected)
    }
}

/// Classify an `eth_sendTransaction` failure
fn send_error(e: ProviderRpcError) -> Error {
    if e.is_user_rejection() {
        Error::TransactionRejected
    } else if e.is_insufficient_funds() {
        Error::InsufficientFunds(e.message)
    } else {
        Error::TransactionReverted(e.to_string())
    }
}
