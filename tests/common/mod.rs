//! Scripted EIP-1193 agent for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::{eip191_hash_message, Address, Signature, U256};
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use rampwool_wallet::agent::{codes, Agent, AgentEvent, Capabilities, ProviderRpcError};
use rampwool_wallet::network::{default_networks, NetworkRegistry};
use rampwool_wallet::{Environment, SessionSettings, WalletSessionManager};

pub const ONE_ETHER: u64 = 1_000_000_000_000_000_000;

pub fn key(byte: u8) -> SigningKey {
    SigningKey::from_slice(&[byte; 32]).unwrap()
}

pub fn address_of(key: &SigningKey) -> String {
    Address::from_private_key(key).to_checksum(None)
}

/// How the next `personal_sign` is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignBehavior {
    Honest,
    Reject,
    /// Sign with an unrelated key
    WrongKey,
}

/// How the next receipt poll is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptBehavior {
    Success,
    Reverted,
    /// `null` forever
    Pending,
}

struct Script {
    accounts: Vec<String>,
    keys: HashMap<String, SigningKey>,
    chain_id: u64,
    known_chains: HashSet<u64>,
    balances: HashMap<String, U256>,
    reject_accounts: bool,
    sign: SignBehavior,
    reject_add_chain: bool,
    reject_switch: bool,
    fail_balance: bool,
    notify_on_switch: bool,
    send_error: Option<ProviderRpcError>,
    receipt: ReceiptBehavior,
    call_result: String,
    latency: Option<Duration>,
    sent: u64,
}

pub struct ScriptedAgent {
    name: String,
    capabilities: Capabilities,
    script: Mutex<Script>,
    calls: Mutex<Vec<(String, Value)>>,
    events: broadcast::Sender<AgentEvent>,
}

impl ScriptedAgent {
    /// Agent holding one account per key, on `chain_id`
    pub fn new(name: &str, keys: &[SigningKey], chain_id: u64) -> Self {
        let mut by_address = HashMap::new();
        let mut accounts = Vec::new();
        for key in keys {
            let address = address_of(key);
            by_address.insert(address.to_lowercase(), key.clone());
            accounts.push(address);
        }

        let (events, _) = broadcast::channel(16);

        Self {
            name: name.to_string(),
            capabilities: Capabilities::default(),
            script: Mutex::new(Script {
                accounts,
                keys: by_address,
                chain_id,
                known_chains: [chain_id].into_iter().collect(),
                balances: HashMap::new(),
                reject_accounts: false,
                sign: SignBehavior::Honest,
                reject_add_chain: false,
                reject_switch: false,
                fail_balance: false,
                notify_on_switch: true,
                send_error: None,
                receipt: ReceiptBehavior::Success,
                call_result: "0x".to_string(),
                latency: None,
                sent: 0,
            }),
            calls: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn set_balance(&self, address: &str, wei: U256) {
        self.script
            .lock()
            .unwrap()
            .balances
            .insert(address.to_lowercase(), wei);
    }

    pub fn set_accounts(&self, keys: &[SigningKey]) {
        let mut script = self.script.lock().unwrap();
        script.accounts.clear();
        for key in keys {
            let address = address_of(key);
            script.keys.insert(address.to_lowercase(), key.clone());
            script.accounts.push(address);
        }
    }

    pub fn add_known_chain(&self, chain_id: u64) {
        self.script.lock().unwrap().known_chains.insert(chain_id);
    }

    pub fn reject_accounts(&self, reject: bool) {
        self.script.lock().unwrap().reject_accounts = reject;
    }

    pub fn sign_behavior(&self, behavior: SignBehavior) {
        self.script.lock().unwrap().sign = behavior;
    }

    pub fn reject_add_chain(&self, reject: bool) {
        self.script.lock().unwrap().reject_add_chain = reject;
    }

    pub fn reject_switch(&self, reject: bool) {
        self.script.lock().unwrap().reject_switch = reject;
    }

    /// Make every `eth_getBalance` fail
    pub fn fail_balance(&self, fail: bool) {
        self.script.lock().unwrap().fail_balance = fail;
    }

    pub fn notify_on_switch(&self, notify: bool) {
        self.script.lock().unwrap().notify_on_switch = notify;
    }

    pub fn fail_send(&self, error: Option<ProviderRpcError>) {
        self.script.lock().unwrap().send_error = error;
    }

    pub fn receipt_behavior(&self, behavior: ReceiptBehavior) {
        self.script.lock().unwrap().receipt = behavior;
    }

    /// Raw `eth_call` return data
    pub fn call_result(&self, data: &[u8]) {
        self.script.lock().unwrap().call_result = format!("0x{}", hex::encode(data));
    }

    /// Delay every request, as a wallet popup would
    pub fn latency(&self, latency: Option<Duration>) {
        self.script.lock().unwrap().latency = latency;
    }

    pub fn chain_id(&self) -> u64 {
        self.script.lock().unwrap().chain_id
    }

    /// Push a notification as the agent would
    pub fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event);
    }

    /// Live notification subscriptions
    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn calls(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    fn respond(&self, method: &str, params: &Value) -> Result<Value, ProviderRpcError> {
        let mut script = self.script.lock().unwrap();

        match method {
            "eth_requestAccounts" => {
                if script.reject_accounts {
                    return Err(ProviderRpcError::user_rejected());
                }
                Ok(json!(script.accounts))
            }
            "eth_accounts" => Ok(json!(script.accounts)),
            "eth_chainId" => Ok(json!(format!("0x{:x}", script.chain_id))),
            "eth_getBalance" => {
                if script.fail_balance {
                    return Err(ProviderRpcError::new(-32603, "header not found"));
                }
                let address = params[0].as_str().unwrap_or_default().to_lowercase();
                let wei = script.balances.get(&address).copied().unwrap_or(U256::ZERO);
                Ok(json!(format!("0x{:x}", wei)))
            }
            "eth_call" => Ok(json!(script.call_result)),
            "personal_sign" => {
                let message = hex::decode(params[0].as_str().unwrap_or_default().trim_start_matches("0x"))
                    .unwrap_or_default();
                let account = params[1].as_str().unwrap_or_default().to_lowercase();

                let signer = match script.sign {
                    SignBehavior::Reject => return Err(ProviderRpcError::user_rejected()),
                    SignBehavior::WrongKey => key(0xEE),
                    SignBehavior::Honest => script
                        .keys
                        .get(&account)
                        .cloned()
                        .ok_or_else(|| ProviderRpcError::new(codes::UNAUTHORIZED, "unknown account"))?,
                };

                let hash = eip191_hash_message(&message);
                let (sig, recid) = signer.sign_prehash_recoverable(hash.as_slice()).unwrap();
                let sig = Signature::from_signature_and_parity(sig, recid.is_y_odd());
                Ok(json!(format!("0x{}", hex::encode(sig.as_bytes()))))
            }
            "wallet_switchEthereumChain" => {
                if script.reject_switch {
                    return Err(ProviderRpcError::user_rejected());
                }
                let chain_id = parse_hex(&params[0]["chainId"]);
                if !script.known_chains.contains(&chain_id) {
                    return Err(ProviderRpcError::unrecognized_chain(chain_id));
                }
                self.change_chain(&mut script, chain_id);
                Ok(Value::Null)
            }
            "wallet_addEthereumChain" => {
                if script.reject_add_chain {
                    return Err(ProviderRpcError::user_rejected());
                }
                let chain_id = parse_hex(&params[0]["chainId"]);
                script.known_chains.insert(chain_id);
                self.change_chain(&mut script, chain_id);
                Ok(Value::Null)
            }
            "eth_sendTransaction" => {
                if let Some(error) = script.send_error.clone() {
                    return Err(error);
                }
                script.sent += 1;
                Ok(json!(format!("0x{:064x}", script.sent)))
            }
            "eth_getTransactionReceipt" => {
                let hash = params[0].clone();
                match script.receipt {
                    ReceiptBehavior::Pending => Ok(Value::Null),
                    behavior => Ok(json!({
                        "transactionHash": hash,
                        "blockNumber": "0x10",
                        "gasUsed": "0x5208",
                        "status": if behavior == ReceiptBehavior::Success { "0x1" } else { "0x0" },
                    })),
                }
            }
            other => Err(ProviderRpcError::new(
                codes::UNSUPPORTED_METHOD,
                format!("{} not supported", other),
            )),
        }
    }

    fn change_chain(&self, script: &mut Script, chain_id: u64) {
        if script.chain_id != chain_id {
            script.chain_id = chain_id;
            if script.notify_on_switch {
                let _ = self.events.send(AgentEvent::ChainChanged(chain_id));
            }
        }
    }
}

fn parse_hex(value: &Value) -> u64 {
    let s = value.as_str().unwrap_or_default();
    u64::from_str_radix(s.trim_start_matches("0x"), 16).unwrap_or_default()
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));

        let latency = self.script.lock().unwrap().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.respond(method, &params)
    }

    fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }
}

pub fn settings(verify_on_connect: bool) -> SessionSettings {
    SessionSettings {
        verify_on_connect,
        balance_decimals: 4,
        receipt_poll: Duration::from_millis(5),
        receipt_timeout: Duration::from_millis(200),
        auto_switch_to: None,
    }
}

pub fn manager_with(agent: Arc<ScriptedAgent>, verify_on_connect: bool) -> WalletSessionManager {
    manager_with_settings(agent, settings(verify_on_connect))
}

pub fn manager_with_settings(agent: Arc<ScriptedAgent>, settings: SessionSettings) -> WalletSessionManager {
    let environment = Environment::new().with_agent(agent);
    let networks = NetworkRegistry::new(default_networks()).unwrap();
    WalletSessionManager::new(environment, networks, settings)
}
