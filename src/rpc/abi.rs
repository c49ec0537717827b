//! Minimal ERC-20 call encoding
//!
//! Only what balance and metadata reads need: static selectors, a single
//! address argument, and `uint256` / `string` return values.

use alloy_primitives::{Address, Bytes, U256};

use crate::error::{Error, Result};

/// `balanceOf(address)`
pub const BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
/// `name()`
pub const NAME: [u8; 4] = [0x06, 0xfd, 0xde, 0x03];
/// `symbol()`
pub const SYMBOL: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
/// `decimals()`
pub const DECIMALS: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];

const WORD: usize = 32;

pub fn encode_call(selector: [u8; 4]) -> Bytes {
    Bytes::copy_from_slice(&selector)
}

pub fn encode_address_call(selector: [u8; 4], arg: Address) -> Bytes {
    let mut data = Vec::with_capacity(4 + WORD);
    data.extend_from_slice(&selector);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(arg.as_slice());
    Bytes::from(data)
}

pub fn decode_u256(data: &[u8]) -> Result<U256> {
    let word = data
        .get(..WORD)
        .ok_or_else(|| Error::Rpc(format!("Expected uint256, got {} bytes", data.len())))?;
    Ok(U256::from_be_slice(word))
}

pub fn decode_u8(data: &[u8]) -> Result<u8> {
    let value = decode_u256(data)?;
    u8::try_from(value).map_err(|_| Error::Rpc(format!("Value {} does not fit in uint8", value)))
}

/// Decode a `string` return value
///
/// Some older tokens return `bytes32` instead; a single word is read as a
/// NUL-padded string.
pub fn decode_string(data: &[u8]) -> Result<String> {
    if data.len() == WORD {
        let end = data.iter().position(|b| *b == 0).unwrap_or(WORD);
        return Ok(String::from_utf8_lossy(&data[..end]).into_owned());
    }

    let offset = word_to_usize(data, 0)?;
    let len = word_to_usize(data, offset)?;
    let start = offset + WORD;
    let bytes = data
        .get(start..start + len)
        .ok_or_else(|| Error::Rpc("String return data truncated".to_string()))?;

    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn word_to_usize(data: &[u8], at: usize) -> Result<usize> {
    let word = data
        .get(at..at + WORD)
        .ok_or_else(|| Error::Rpc("Return data truncated".to_string()))?;
    let value = U256::from_be_slice(word);
    usize::try_from(value).map_err(|_| Error::Rpc("Offset out of range".to_string()))
}
