//! Native-unit formatting and parsing
//!
//! Balances are displayed with a fixed number of fractional digits and
//! prices are entered as decimal strings, both with 18-decimal native
//! currencies in mind.

use alloy_primitives::{Address, U256};

use crate::error::{Error, Result};

/// Decimals of every native currency the marketplace runs on
pub const NATIVE_DECIMALS: u8 = 18;

/// Format a base-unit amount with `digits` fractional digits, rounding half up
pub fn format_units(value: U256, decimals: u8, digits: u8) -> String {
    let digits = digits.min(decimals);
    let ten = U256::from(10u64);

    let scale = ten.pow(U256::from(decimals - digits));
    let half = scale / U256::from(2u64);
    let scaled = value.saturating_add(half) / scale;

    if digits == 0 {
        return scaled.to_string();
    }

    let unit = ten.pow(U256::from(digits));
    let whole = scaled / unit;
    let frac = scaled % unit;
    format!(
        "{}.{:0>width$}",
        whole,
        frac.to_string(),
        width = digits as usize
    )
}

/// Format wei as a native-unit string (e.g. `1.2346`)
pub fn format_ether(wei: U256, digits: u8) -> String {
    format_units(wei, NATIVE_DECIMALS, digits)
}

/// Parse a decimal string into base units
pub fn parse_units(amount: &str, decimals: u8) -> Result<U256> {
    let amount = amount.trim();
    let invalid = || Error::InvalidAmount(amount.to_string());

    let (whole, frac) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };

    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let frac = frac.trim_end_matches('0');
    if frac.len() > decimals as usize {
        return Err(Error::InvalidAmount(format!(
            "{} has more than {} decimal places",
            amount, decimals
        )));
    }

    let ten = U256::from(10u64);
    let whole: U256 = if whole.is_empty() {
        U256::ZERO
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let frac_value: U256 = if frac.is_empty() {
        U256::ZERO
    } else {
        frac.parse().map_err(|_| invalid())?
    };

    let whole_units = whole
        .checked_mul(ten.pow(U256::from(decimals)))
        .ok_or_else(invalid)?;
    let frac_units = frac_value * ten.pow(U256::from(decimals as usize - frac.len()));

    whole_units.checked_add(frac_units).ok_or_else(invalid)
}

/// Parse a native-unit decimal string (e.g. `"0.1"`) into wei
pub fn parse_ether(amount: &str) -> Result<U256> {
    parse_units(amount, NATIVE_DECIMALS)
}

/// Shorten an address for display: `0x1234...abcd`
pub fn short_address(address: &str) -> String {
    if address.len() <= 10 {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

/// Parse an address of any case and return its EIP-55 checksum form
pub fn checksum_address(address: &str) -> Result<String> {
    let parsed: Address = address
        .trim()
        .parse()
        .map_err(|_| Error::InvalidAddress(address.to_string()))?;
    Ok(parsed.to_checksum(None))
}
