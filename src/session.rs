//! Session state and its transitions
//!
//! All mutation goes through the methods here so that the
//! verification invariant holds by construction: a session is verified
//! only while its address equals the most recently verified address.

use std::fmt;

/// Balance shown while disconnected
pub const ZERO_BALANCE: &str = "0";

/// Observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected { verified: bool },
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected { verified: true } => write!(f, "connected (verified)"),
            SessionState::Connected { verified: false } => write!(f, "connected (unverified)"),
        }
    }
}

/// What an `accountsChanged` notification did to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountsOutcome {
    Switched(String),
    Disconnected,
}

/// The current connection record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    address: Option<String>,
    chain_id: Option<u64>,
    balance: String,
    verified_address: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            address: None,
            chain_id: None,
            balance: ZERO_BALANCE.to_string(),
            verified_address: None,
        }
    }
}

impl Session {
    /// A freshly connected, unverified session
    pub fn connected(address: String, chain_id: u64, balance: String) -> Self {
        Self {
            address: Some(address),
            chain_id: Some(chain_id),
            balance,
            verified_address: None,
        }
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }

    pub fn balance(&self) -> &str {
        &self.balance
    }

    pub fn is_connected(&self) -> bool {
        self.address.is_some()
    }

    pub fn is_verified(&self) -> bool {
        match (&self.address, &self.verified_address) {
            (Some(current), Some(verified)) => current.eq_ignore_ascii_case(verified),
            _ => false,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.is_connected() {
            SessionState::Connected {
                verified: self.is_verified(),
            }
        } else {
            SessionState::Disconnected
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Apply a new account list reported by the agent.
    ///
    /// A different account starts from a zero balance until refreshed.
    pub fn apply_accounts_changed(&mut self, accounts: &[String]) -> AccountsOutcome {
        match accounts.first() {
            Some(first) => {
                let same = self
                    .address
                    .as_deref()
                    .is_some_and(|current| current.eq_ignore_ascii_case(first));
                if !same {
                    self.balance = ZERO_BALANCE.to_string();
                }
                self.address = Some(first.clone());
                self.verified_address = None;
                AccountsOutcome::Switched(first.clone())
            }
            None => {
                self.clear();
                AccountsOutcome::Disconnected
            }
        }
    }

    /// Apply a new chain id; address and verification are untouched
    pub fn apply_chain_changed(&mut self, chain_id: u64) {
        if self.is_connected() {
            self.chain_id = Some(chain_id);
        }
    }

    /// Record a successful challenge for `address`.
    ///
    /// Returns false (and changes nothing) if the session moved to another
    /// account while the challenge was in flight.
    pub fn mark_verified(&mut self, address: &str) -> bool {
        match &self.address {
            Some(current) if current.eq_ignore_ascii_case(address) => {
                self.verified_address = Some(current.clone());
                true
            }
            _ => false,
        }
    }

    /// Drop verification for `address` if it is the session account
    pub fn revoke_verification(&mut self, address: &str) -> bool {
        match &self.address {
            Some(current) if current.eq_ignore_ascii_case(address) && self.is_verified() => {
                self.verified_address = None;
                true
            }
            _ => false,
        }
    }

    /// Store a refreshed balance if it still belongs to the session address
    pub fn set_balance(&mut self, address: &str, balance: String) -> bool {
        match &self.address {
            Some(current) if current.eq_ignore_ascii_case(address) => {
                self.balance = balance;
                true
            }
            _ => false,
        }
    }
}
