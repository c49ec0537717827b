//! Local pre-flight validation
//!
//! Cheap checks run before any network call so obviously bad requests never
//! cost a round-trip. The contract remains the authority; these only catch
//! what the client can already see.

use alloy_primitives::{Address, U256};
use tracing::debug;

use crate::error::{Error, Result};

/// A withdrawal about to be requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalRequest {
    pub to: Address,
    pub amount: U256,
    /// `None` for native ETH
    pub token: Option<Address>,
}

impl WithdrawalRequest {
    pub fn eth(to: Address, amount: U256) -> Self {
        Self {
            to,
            amount,
            token: None,
        }
    }

    pub fn token(token: Address, to: Address, amount: U256) -> Self {
        Self {
            to,
            amount,
            token: Some(token),
        }
    }
}

/// Parse a `0x`-prefixed 20-byte address
pub fn parse_address(input: &str) -> Result<Address> {
    let trimmed = input.trim();
    if !trimmed.starts_with("0x") || trimmed.len() != 42 {
        return Err(Error::InvalidInput(format!("Invalid address: '{}'", input)));
    }
    trimmed
        .parse()
        .map_err(|e| Error::InvalidInput(format!("Invalid address '{}': {}", input, e)))
}

/// Validate a withdrawal against what the client knows
///
/// `known_balance` is the last balance the client observed for the asset,
/// if any; without it only the shape of the request is checked.
pub fn check_withdrawal(request: &WithdrawalRequest, known_balance: Option<U256>) -> Result<()> {
    if request.to == Address::ZERO {
        return Err(Error::InvalidInput(
            "Recipient cannot be the zero address".to_string(),
        ));
    }

    if request.token == Some(Address::ZERO) {
        return Err(Error::InvalidInput(
            "Token cannot be the zero address".to_string(),
        ));
    }

    if request.amount.is_zero() {
        return Err(Error::InvalidInput("Amount must be positive".to_string()));
    }

    if let Some(available) = known_balance {
        if request.amount > available {
            return Err(Error::AmountExceedsBalance {
                requested: request.amount,
                available,
            });
        }
    }

    debug!(
        "Withdrawal pre-flight passed: {} to {} (token: {:?})",
        request.amount, request.to, request.token
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let addr = parse_address("0x000000000000000000000000000000000000dEaD").unwrap();
        assert_eq!(&addr.as_slice()[18..], &[0xde, 0xad]);
        assert!(addr.as_slice()[..18].iter().all(|b| *b == 0));
        assert!(parse_address("dead").is_err());
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("0xzz0000000000000000000000000000000000dead").is_err());
    }

    #[test]
    fn test_zero_recipient_rejected() {
        let request = WithdrawalRequest::eth(Address::ZERO, U256::from(1u64));
        assert!(matches!(
            check_withdrawal(&request, None),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_zero_amount_rejected() {
        let request = WithdrawalRequest::eth(Address::repeat_byte(1), U256::ZERO);
        assert!(matches!(
            check_withdrawal(&request, None),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_amount_exceeds_known_balance() {
        let request = WithdrawalRequest::token(
            Address::repeat_byte(3),
            Address::repeat_byte(1),
            U256::from(101u64),
        );
        let result = check_withdrawal(&request, Some(U256::from(100u64)));
        assert!(matches!(result, Err(Error::AmountExceedsBalance { .. })));

        // Exactly the balance is fine
        let request = WithdrawalRequest::eth(Address::repeat_byte(1), U256::from(100u64));
        assert!(check_withdrawal(&request, Some(U256::from(100u64))).is_ok());
    }
}
