//! JSON-RPC access to an EVM node
//!
//! Used for wallet balances and the `chain` / `balance` commands. Vault
//! writes go through the wallet, not through this client.

pub mod abi;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::tokens::balances::BalanceReader;
use crate::vault::types::TokenMetadata;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// HTTP JSON-RPC client
pub struct JsonRpcClient {
    client: Client,
    endpoint: Url,
    timeout: Duration,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("Invalid RPC endpoint '{}': {}", endpoint, e)))?;

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!("RPC {} (id {})", method, id);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Rpc(format!("{} returned {}: {}", method, status, text)));
        }

        let parsed: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Bad {} response: {}", method, e)))?;

        if let Some(err) = parsed.error {
            return Err(Error::Rpc(format!("{} failed ({}): {}", method, err.code, err.message)));
        }

        parsed
            .result
            .ok_or_else(|| Error::Rpc(format!("{} returned no result", method)))
    }

    fn map_transport(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::RpcTimeout(self.timeout.as_millis() as u64)
        } else {
            Error::Rpc(format!("Request to {} failed: {}", self.endpoint, e))
        }
    }

    /// `eth_chainId`
    pub async fn chain_id(&self) -> Result<u64> {
        let raw: String = self.request("eth_chainId", serde_json::json!([])).await?;
        parse_quantity(&raw).and_then(|v| {
            u64::try_from(v).map_err(|_| Error::Rpc(format!("Chain id out of range: {}", raw)))
        })
    }

    /// `eth_getBalance` at the latest block
    pub async fn get_balance(&self, account: Address) -> Result<U256> {
        let raw: String = self
            .request("eth_getBalance", serde_json::json!([account, "latest"]))
            .await?;
        parse_quantity(&raw)
    }

    /// `eth_call` at the latest block
    pub async fn eth_call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let raw: String = self
            .request(
                "eth_call",
                serde_json::json!([{ "to": to, "data": data }, "latest"]),
            )
            .await?;
        raw.parse::<Bytes>()
            .map_err(|e| Error::Rpc(format!("Invalid call result '{}': {}", raw, e)))
    }
}

/// Parse a hex `QUANTITY`
pub fn parse_quantity(raw: &str) -> Result<U256> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| Error::Rpc(format!("Invalid quantity: {}", raw)))?;
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| Error::Rpc(format!("Invalid quantity {}: {}", raw, e)))
}

#[async_trait]
impl BalanceReader for JsonRpcClient {
    async fn native_balance(&self, account: Address) -> Result<U256> {
        self.get_balance(account).await
    }

    async fn token_balance(&self, token: Address, account: Address) -> Result<U256> {
        let data = self
            .eth_call(token, abi::encode_address_call(abi::BALANCE_OF, account))
            .await?;
        abi::decode_u256(&data)
    }

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata> {
        let (name, symbol, decimals) = futures::try_join!(
            self.eth_call(token, abi::encode_call(abi::NAME)),
            self.eth_call(token, abi::encode_call(abi::SYMBOL)),
            self.eth_call(token, abi::encode_call(abi::DECIMALS)),
        )?;

        Ok(TokenMetadata {
            name: abi::decode_string(&name)?,
            symbol: abi::decode_string(&symbol)?,
            decimals: abi::decode_u8(&decimals)?,
            logo: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), U256::ZERO);
        assert_eq!(parse_quantity("0x").unwrap(), U256::ZERO);
        assert_eq!(parse_quantity("0x2105").unwrap(), U256::from(8453u64));
        assert!(parse_quantity("2105").is_err());
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        let result = JsonRpcClient::new("not a url", Duration::from_secs(1));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_rpc_error() {
        let client = JsonRpcClient::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        let err = client.chain_id().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
