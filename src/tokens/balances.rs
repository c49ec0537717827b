//! Wallet balance fetcher
//!
//! Reads the native and ERC-20 balances of an arbitrary account on demand.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::vault::types::TokenMetadata;

/// Balance queries against a chain
#[async_trait]
pub trait BalanceReader: Send + Sync {
    async fn native_balance(&self, account: Address) -> Result<U256>;

    /// ERC-20 `balanceOf(account)`
    async fn token_balance(&self, token: Address, account: Address) -> Result<U256>;

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata>;
}

/// One token line of a snapshot
#[derive(Debug, Clone, Serialize)]
pub struct TokenBalance {
    pub token: Address,
    pub balance: Option<U256>,
    pub metadata: Option<TokenMetadata>,
    pub error: Option<String>,
}

/// Balances of one account at one moment
#[derive(Debug, Clone, Serialize)]
pub struct WalletSnapshot {
    pub account: Address,
    pub native: U256,
    pub tokens: Vec<TokenBalance>,
}

/// On-demand balance fetcher
pub struct WalletBalances {
    reader: Arc<dyn BalanceReader>,
}

impl WalletBalances {
    pub fn new(reader: Arc<dyn BalanceReader>) -> Self {
        Self { reader }
    }

    pub async fn native(&self, account: Address) -> Result<U256> {
        self.reader.native_balance(account).await
    }

    /// Native balance plus every requested token
    ///
    /// A failing token is reported on its own entry; only a native balance
    /// failure fails the snapshot.
    pub async fn snapshot(&self, account: Address, tokens: &[Address]) -> Result<WalletSnapshot> {
        let native = self.reader.native_balance(account).await?;

        let lines = join_all(tokens.iter().map(|token| self.token_line(account, *token))).await;

        debug!("Snapshot of {}: {} tokens", account, lines.len());

        Ok(WalletSnapshot {
            account,
            native,
            tokens: lines,
        })
    }

    async fn token_line(&self, account: Address, token: Address) -> TokenBalance {
        let (balance, metadata) = futures::join!(
            self.reader.token_balance(token, account),
            self.reader.token_metadata(token)
        );

        let mut line = TokenBalance {
            token,
            balance: None,
            metadata: None,
            error: None,
        };

        match balance {
            Ok(value) => line.balance = Some(value),
            Err(e) => {
                warn!("Balance of {} for {} failed: {}", token, account, e);
                line.error = Some(e.to_string());
            }
        }

        match metadata {
            Ok(meta) => line.metadata = Some(meta),
            Err(e) => {
                if line.error.is_none() {
                    line.error = Some(e.to_string());
                }
            }
        }

        line
    }
}
