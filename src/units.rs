//! Amount helpers
//!
//! Amounts are `U256` in the token's smallest unit. Persisted amounts are
//! decimal strings.

use alloy_primitives::utils::{format_units, parse_units};
use alloy_primitives::U256;

use crate::error::{Error, Result};

/// Decimals of the native currency
pub const ETH_DECIMALS: u8 = 18;

/// 1 gwei in wei
pub const GWEI: u64 = 1_000_000_000;

/// Convert a gwei count to wei
pub fn gwei(amount: u64) -> U256 {
    U256::from(amount) * U256::from(GWEI)
}

/// Human-readable amount, e.g. `1.5` for 1.5e18 with 18 decimals
pub fn format_amount(amount: U256, decimals: u8) -> String {
    match format_units(amount, decimals) {
        Ok(s) => trim_fraction(&s),
        Err(_) => amount.to_string(),
    }
}

/// Parse a human-readable, non-negative amount into base units
pub fn parse_amount(input: &str, decimals: u8) -> Result<U256> {
    let input = input.trim();
    if input.is_empty() || input.starts_with('-') {
        return Err(Error::InvalidInput(format!("Invalid amount: '{}'", input)));
    }

    parse_units(input, decimals)
        .map(|parsed| parsed.get_absolute())
        .map_err(|e| Error::InvalidInput(format!("Invalid amount '{}': {}", input, e)))
}

/// Parse a base-10 integer string
pub fn parse_decimal(input: &str) -> Result<U256> {
    U256::from_str_radix(input.trim(), 10)
        .map_err(|e| Error::Serialization(format!("Invalid decimal integer '{}': {}", input, e)))
}

fn trim_fraction(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `U256` as a decimal string for serde
pub mod decimal_u256 {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        U256::from_str_radix(s.trim(), 10).map_err(serde::de::Error::custom)
    }
}
