//! Ownership challenge
//!
//! The user signs a human-readable message with `personal_sign`; we
//! recover the EIP-191 signer and compare it with the claimed address.

use alloy_primitives::{Address, Signature};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::rpc::hex_data;

/// Message the user is asked to sign
pub fn challenge_message(address: &str, issued_at: DateTime<Utc>) -> String {
    format!(
        "Welcome to RampWool!\n\n\
         Sign this message to prove you own this wallet. \
         It does not send a transaction or cost any gas.\n\n\
         Wallet address:\n{}\n\n\
         Issued at:\n{}",
        address,
        issued_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// `personal_sign` params: hex-encoded message first, then the account
pub fn personal_sign_params(message: &str, address: &str) -> Value {
    json!([hex_data(message.as_bytes()), address])
}

/// Parse a 65-byte `0x`-prefixed signature returned by an agent
pub fn parse_signature(value: &Value) -> Result<Signature> {
    let s = value
        .as_str()
        .ok_or_else(|| Error::Serialization(format!("Expected signature string, got {}", value)))?;
    let bytes = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| Error::Serialization(format!("Invalid signature hex: {}", e)))?;
    Signature::from_raw(&bytes)
        .map_err(|e| Error::Serialization(format!("Invalid signature: {}", e)))
}

/// Recover the EIP-191 signer of `message`
pub fn recover_signer(message: &str, signature: &Signature) -> Result<Address> {
    signature
        .recover_address_from_msg(message.as_bytes())
        .map_err(|e| Error::Serialization(format!("Signature recovery failed: {}", e)))
}

/// Whether `signature` over `message` was produced by `claimed`
pub fn signed_by(message: &str, signature: &Signature, claimed: &str) -> bool {
    match recover_signer(message, signature) {
        Ok(recovered) => recovered.to_checksum(None).eq_ignore_ascii_case(claimed.trim()),
        Err(_) => false,
    }
}
